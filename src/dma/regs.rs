//! Register layout for a legacy (32-bit) DMA channel.
//!
//! One [`ChannelRegs`] block is `0x100` bytes wide on the real
//! hardware; channels are laid out at fixed offsets from the DMA
//! controller's base within the peripheral window.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::{register_bitfields, register_structs};
use tock_registers::registers::ReadWrite;

register_bitfields! [u32,
    pub CS [
        RESET OFFSET(31) NUMBITS(1) [],
        ABORT OFFSET(30) NUMBITS(1) [],
        DISDEBUG OFFSET(29) NUMBITS(1) [],
        WAIT_FOR_OUTSTANDING_WRITES OFFSET(28) NUMBITS(1) [],
        PANIC_PRIORITY OFFSET(20) NUMBITS(4) [],
        PRIORITY OFFSET(16) NUMBITS(4) [],
        ERROR OFFSET(8) NUMBITS(1) [],
        WAITING_FOR_OUTSTANDING_WRITES OFFSET(6) NUMBITS(1) [],
        DREQ_STOPS_DMA OFFSET(5) NUMBITS(1) [],
        PAUSED OFFSET(4) NUMBITS(1) [],
        DREQ OFFSET(3) NUMBITS(1) [],
        INT OFFSET(2) NUMBITS(1) [],
        END OFFSET(1) NUMBITS(1) [],
        ACTIVE OFFSET(0) NUMBITS(1) [],
    ],

    pub TI [
        NO_WIDE_BURSTS OFFSET(26) NUMBITS(1) [],
        WAITS OFFSET(21) NUMBITS(5) [],
        PERMAP OFFSET(16) NUMBITS(5) [],
        BURST_LENGTH OFFSET(12) NUMBITS(4) [],
        SRC_IGNORE OFFSET(11) NUMBITS(1) [],
        SRC_DREQ OFFSET(10) NUMBITS(1) [],
        SRC_WIDTH OFFSET(9) NUMBITS(1) [],
        SRC_INC OFFSET(8) NUMBITS(1) [],
        DEST_IGNORE OFFSET(7) NUMBITS(1) [],
        DEST_DREQ OFFSET(6) NUMBITS(1) [],
        DEST_WIDTH OFFSET(5) NUMBITS(1) [],
        DEST_INC OFFSET(4) NUMBITS(1) [],
        WAIT_RESP OFFSET(3) NUMBITS(1) [],
        TDMODE OFFSET(1) NUMBITS(1) [],
        INTEN OFFSET(0) NUMBITS(1) [],
    ],

    pub DEBUG [
        LITE OFFSET(28) NUMBITS(1) [],
        VERSION OFFSET(25) NUMBITS(3) [],
        READ_ERROR OFFSET(2) NUMBITS(1) [],
        FIFO_ERROR OFFSET(1) NUMBITS(1) [],
        READ_LAST_NOT_SET_ERROR OFFSET(0) NUMBITS(1) [],
    ],
];

register_structs! [
    pub ChannelRegs {
        (0x00 => pub cs: ReadWrite<u32, CS::Register>),
        (0x04 => pub conblk_ad: ReadWrite<u32>),
        (0x08 => pub ti: ReadWrite<u32, TI::Register>),
        (0x0c => pub source_ad: ReadWrite<u32>),
        (0x10 => pub dest_ad: ReadWrite<u32>),
        (0x14 => pub txfr_len: ReadWrite<u32>),
        (0x18 => pub stride: ReadWrite<u32>),
        (0x1c => pub nextconbk: ReadWrite<u32>),
        (0x20 => pub debug: ReadWrite<u32, DEBUG::Register>),
        (0x24 => @END),
    ]
];

/// Byte stride between consecutive channels' register blocks.
pub const CHANNEL_STRIDE: usize = 0x100;

/// `TXFR_LEN` field width for a legacy channel: 16 bits, 30-bit total
/// with y-count in the high half for 2-D mode.
pub const TXFR_LEN_MAX: u32 = 0x3FFF_FFFF;

/// `TXFR_LEN` cap for a "Lite" channel, which only has a 16-bit length
/// field and no 2-D mode.
pub const TXFR_LEN_MAX_LITE: u32 = 0xFFFF;

/// Global enable register: one bit per channel.
pub const ENABLE_OFFSET: usize = 0xFF0;

/// Global interrupt status register: one bit per channel, set when that
/// channel's `CS.INT` is set.
pub const INT_STATUS_OFFSET: usize = 0xFE0;

#[inline]
pub unsafe fn channel_regs(dma_base: usize, channel: u32) -> *const ChannelRegs {
    (dma_base + channel as usize * CHANNEL_STRIDE) as *const ChannelRegs
}
