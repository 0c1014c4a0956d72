//! Fake MMIO backing for host-run unit tests (spec §8: "inspect via
//! test fake", "the fake controller signals...").
//!
//! Every register-level driver in this crate reaches hardware only
//! through [`crate::arch::mmio`]'s `read32`/`write32`, which are plain
//! volatile accesses through a `usize` address — they have no opinion
//! about where that address comes from. A [`FakeBus`] is just enough
//! real, process-mapped memory, sized and zeroed like the real
//! register window, for those same functions to operate on when run on
//! the host under `cargo test` instead of on target hardware.

use alloc::boxed::Box;

/// A block of real memory standing in for a peripheral's register
/// window or the DMA-visible coherent region.
pub struct FakeBus {
    backing: Box<[u8]>,
}

impl FakeBus {
    pub fn new(size: usize) -> Self {
        Self {
            backing: alloc::vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn base(&mut self) -> usize {
        self.backing.as_mut_ptr() as usize
    }

    pub fn read32(&self, offset: usize) -> u32 {
        let bytes = &self.backing[offset..offset + 4];
        u32::from_ne_bytes(bytes.try_into().unwrap())
    }
}
