//! Fixed memory-map facts for the SoC family this crate targets
//! (peripheral base, DMA bus-address rebasing, the DMA-visible window).
//!
//! These are the ARM-core-visible addresses; `arch::mmio::bus_address`
//! is the `BUS_ADDRESS` rebasing function from spec §6 that turns a
//! peripheral offset into the address a DMA master uses to reach it.

/// Base address of the peripheral MMIO window as seen from the ARM core.
pub const PERIPHERAL_BASE: usize = 0x3F00_0000;

/// High byte that marks an address as GPU/bus space when rebasing a
/// peripheral offset to a DMA bus address (`BUS_ADDRESS` in spec §6).
pub const GPU_IO_BASE: u32 = 0x7E00_0000;

/// Base address of the reserved, page-aligned, cache-coherent DMA
/// window (spec §6, "DMA-visible memory window").
pub const DMA_WINDOW_BASE: usize = 0x3C00_0000;

/// Size of the DMA-visible window, in bytes.
pub const DMA_WINDOW_SIZE: usize = 4 * 1024 * 1024;

/// L1 data cache line size, in bytes. Cache maintenance ranges are
/// rounded out to this granularity.
pub const CACHE_LINE_SIZE: usize = 64;
