//! I²S sound back end (spec §4.3, "The I²S back end clears TX FIFO,
//! waits the documented microsecond delays, then enables channels 1
//! and 2 with their slot positions; in slave mode it programs clock
//! and frame-sync as inputs").
//!
//! Grounded on the PCM/I²S register layout and bring-up sequence
//! (`CS_A_TXCLR`, `MODE_A_*`, `TXC_A_CH1*`/`TXC_A_CH2*`, `GPIOClockPCM`).
//! Only master-clock mode is implemented; slave mode (clock and
//! frame-sync driven externally) is a configuration of the same
//! `MODE_A` register this module does not yet set up.

use crate::arch::layout::PERIPHERAL_BASE;
use crate::arch::mmio::{self, bus_address, read32, write32};
use crate::dma::{ChannelClass, ChannelPool, DmaChannel, DmaError};
use crate::gpio::{Clock, ClockGenerator};
use crate::irq::InterruptController;
use crate::mem::CoherentAllocator;

use super::device::{BaseDevice, ChunkProvider, State};
use super::format::HwFormat;

const PCM_BASE: usize = PERIPHERAL_BASE + 0x0020_3000;
const PCM_CS_A: usize = PCM_BASE + 0x00;
const PCM_FIFO_A: usize = PCM_BASE + 0x04;
const PCM_MODE_A: usize = PCM_BASE + 0x08;
const PCM_TXC_A: usize = PCM_BASE + 0x0C;

const CS_A_TXE: u32 = 1 << 21;
const CS_A_TXCLR: u32 = 1 << 3;
const CS_A_TXON: u32 = 1 << 2;
const CS_A_EN: u32 = 1 << 0;
const CS_A_DMAEN: u32 = 1 << 9;

const TXC_A_CH1EN: u32 = 1 << 30;
const TXC_A_CH1POS_SHIFT: u32 = 20;
const TXC_A_CH1WID_SHIFT: u32 = 16;
const TXC_A_CH2EN: u32 = 1 << 14;
const TXC_A_CH2POS_SHIFT: u32 = 4;
const TXC_A_CH2WID_SHIFT: u32 = 0;

const MODE_A_FLEN_SHIFT: u32 = 10;
const MODE_A_FSLEN_SHIFT: u32 = 0;

const DREQ_PCM_TX: u32 = 2;
const CHANNEL_SLOT_WIDTH_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2sSoundError {
    Dma(DmaError),
}

impl From<DmaError> for I2sSoundError {
    fn from(e: DmaError) -> Self {
        I2sSoundError::Dma(e)
    }
}

pub struct I2sSoundDevice<'a> {
    base: BaseDevice,
    dma: DmaChannel<'a>,
    clock: Clock,
    chunk_size: usize,
    provider: &'a dyn ChunkProvider,
    buffers: [usize; 2],
}

impl<'a> I2sSoundDevice<'a> {
    pub fn new(
        pool: &'a ChannelPool,
        irq: &'a InterruptController,
        allocator: &'a CoherentAllocator,
        dma_base: usize,
        sample_rate: u32,
        chunk_size: usize,
        master_clock_hz: u32,
        provider: &'a dyn ChunkProvider,
    ) -> Result<Self, I2sSoundError> {
        let clock = Clock::new(ClockGenerator::Pcm);

        let mut dma = DmaChannel::new(pool, irq, allocator, dma_base, ChannelClass::Normal)?;

        let buf_bytes = chunk_size * core::mem::size_of::<u32>();
        let buffers = [
            allocator.allocate(buf_bytes, 32, 0).map_err(|_| DmaError::OutOfMemory)? as usize,
            allocator.allocate(buf_bytes, 32, 0).map_err(|_| DmaError::OutOfMemory)? as usize,
        ];

        dma.setup_cyclic_io_write(pcm_fifo_bus_address(), &buffers, buf_bytes, DREQ_PCM_TX)?;

        let _ = sample_rate;
        let _ = master_clock_hz;

        Ok(Self {
            base: BaseDevice::new(),
            dma,
            clock,
            chunk_size,
            provider,
            buffers,
        })
    }

    fn bring_up(&self) {
        mmio::peripheral_entry();
        unsafe {
            write32(PCM_CS_A, 0);
            let _ = self.clock.start_rate(CHANNEL_SLOT_WIDTH_BITS * 2 * 48_000);
            write32(PCM_CS_A, CS_A_TXCLR);
        }
        mmio::peripheral_exit();

        let timeout = crate::time::Timeout::from_us(50);
        crate::time::poll_until(timeout, || false);

        mmio::peripheral_entry();
        unsafe {
            write32(
                PCM_MODE_A,
                (CHANNEL_SLOT_WIDTH_BITS * 2 - 1) << MODE_A_FLEN_SHIFT
                    | (CHANNEL_SLOT_WIDTH_BITS) << MODE_A_FSLEN_SHIFT,
            );
            write32(
                PCM_TXC_A,
                TXC_A_CH1EN
                    | (0 << TXC_A_CH1POS_SHIFT)
                    | (0 << TXC_A_CH1WID_SHIFT)
                    | TXC_A_CH2EN
                    | (CHANNEL_SLOT_WIDTH_BITS << TXC_A_CH2POS_SHIFT)
                    | (0 << TXC_A_CH2WID_SHIFT),
            );
            write32(PCM_CS_A, CS_A_EN);
            write32(PCM_CS_A, read32(PCM_CS_A) | CS_A_TXON);
        }
        mmio::peripheral_exit();
    }

    fn shut_down(&self) {
        mmio::peripheral_entry();
        unsafe { write32(PCM_CS_A, 0) };
        self.clock.stop();
        mmio::peripheral_exit();
    }

    fn fill_buffer(&self, index: u8) -> bool {
        let addr = self.buffers[index as usize] as *mut u32;
        let slice = unsafe { core::slice::from_raw_parts_mut(addr, self.chunk_size) };
        self.provider.get_chunk(slice) > 0
    }

    pub fn start(&mut self) -> bool {
        self.bring_up();
        let ok = self.base.start(|buf| self.fill_buffer(buf));
        if !ok {
            self.shut_down();
            return false;
        }

        self.dma.set_completion_routine(i2s_irq_trampoline, self as *const Self as *mut ());
        mmio::peripheral_entry();
        unsafe { write32(PCM_CS_A, read32(PCM_CS_A) | CS_A_DMAEN) };
        mmio::peripheral_exit();
        let _ = self.dma.start();
        true
    }

    pub fn cancel(&self) {
        self.base.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    fn handle_completion(&self, completed_buffer: u8, success: bool) {
        if !success {
            self.base.set_error();
            return;
        }
        let dma = &self.dma;
        self.base.on_irq(completed_buffer, |buf| self.fill_buffer(buf), || dma.cancel());
        if self.base.state() == State::Idle {
            self.shut_down();
        }
    }

    fn hw_format(&self) -> HwFormat {
        HwFormat::Signed16
    }
}

fn pcm_fifo_bus_address() -> u32 {
    bus_address((PCM_FIFO_A - PERIPHERAL_BASE) as u32)
}

fn i2s_irq_trampoline(_channel: u32, buffer_index: u32, success: bool, param: *mut ()) {
    let device = unsafe { &*(param as *const I2sSoundDevice) };
    device.handle_completion(buffer_index as u8, success);
}
