//! PWM sound back end (spec §4.3, §4.3 "PWM/I²S peripheral quirks":
//! "The PWM back end sets `REPEAT_LAST` on terminate to prevent
//! audible clicks").
//!
//! Grounded on the construction/`Start`/`InterruptHandler` sequence of
//! the PWM sound device: allocate a Lite DMA channel, build two
//! control blocks chained to each other, program the clock and PWM
//! peripheral, then drive [`super::device::BaseDevice`]'s state
//! machine from the DMA completion interrupt.

use crate::arch::layout::PERIPHERAL_BASE;
use crate::arch::mmio::{self, bus_address, read32, write32};
use crate::dma::{ChannelClass, ChannelPool, DmaChannel, DmaError, DREQ_NONE};
use crate::gpio::{Clock, ClockGenerator, Mode, Pin};
use crate::irq::InterruptController;
use crate::mem::CoherentAllocator;
use crate::time::Timeout;

use super::device::{BaseDevice, ChunkProvider, State};
use super::format::HwFormat;

const PWM_BASE: usize = PERIPHERAL_BASE + 0x0020_C000;
const PWM_CTL: usize = PWM_BASE + 0x00;
const PWM_DMAC: usize = PWM_BASE + 0x08;
const PWM_RNG1: usize = PWM_BASE + 0x10;
const PWM_RNG2: usize = PWM_BASE + 0x20;
const PWM_FIF1: usize = PWM_BASE + 0x18;

const CTL_PWEN1: u32 = 1 << 0;
const CTL_USEF1: u32 = 1 << 5;
const CTL_CLRF1: u32 = 1 << 6;
const CTL_PWEN2: u32 = 1 << 8;
const CTL_USEF2: u32 = 1 << 13;
const CTL_RPTL1: u32 = 1 << 2;
const CTL_RPTL2: u32 = 1 << 10;

const DMAC_ENAB: u32 = 1 << 31;

const CLOCK_RATE_HZ: u32 = 250_000_000;
const DREQ_PWM: u32 = 5;

pub const GPIO_PIN_AUDIO_LEFT: u32 = 40;
pub const GPIO_PIN_AUDIO_RIGHT: u32 = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmSoundError {
    Dma(DmaError),
}

impl From<DmaError> for PwmSoundError {
    fn from(e: DmaError) -> Self {
        PwmSoundError::Dma(e)
    }
}

/// Owns the two GPIO pins, clock generator, and DMA Lite channel a PWM
/// sound output needs.
pub struct PwmSoundDevice<'a> {
    base: BaseDevice,
    dma: DmaChannel<'a>,
    _audio_left: Pin,
    _audio_right: Pin,
    clock: Clock,
    range: u32,
    chunk_size: usize,
    provider: &'a dyn ChunkProvider,
    buffers: [usize; 2],
}

impl<'a> PwmSoundDevice<'a> {
    pub fn new(
        pool: &'a ChannelPool,
        irq: &'a InterruptController,
        allocator: &'a CoherentAllocator,
        dma_base: usize,
        sample_rate: u32,
        chunk_size: usize,
        provider: &'a dyn ChunkProvider,
    ) -> Result<Self, PwmSoundError> {
        let range = (CLOCK_RATE_HZ + sample_rate / 2) / sample_rate;

        let audio_left = Pin::new(GPIO_PIN_AUDIO_LEFT, Mode::Alt0);
        let audio_right = Pin::new(GPIO_PIN_AUDIO_RIGHT, Mode::Alt0);
        let clock = Clock::new(ClockGenerator::Pwm);

        let mut dma = DmaChannel::new(pool, irq, allocator, dma_base, ChannelClass::Lite)?;

        let buf_bytes = chunk_size * core::mem::size_of::<u32>();
        let buffers = [
            allocator.allocate(buf_bytes, 32, 0).map_err(|_| DmaError::OutOfMemory)? as usize,
            allocator.allocate(buf_bytes, 32, 0).map_err(|_| DmaError::OutOfMemory)? as usize,
        ];

        dma.setup_cyclic_io_write(pwm_fifo_bus_address(), &buffers, buf_bytes, DREQ_PWM)?;
        let _ = DREQ_NONE;

        Ok(Self {
            base: BaseDevice::new(),
            dma,
            _audio_left: audio_left,
            _audio_right: audio_right,
            clock,
            range,
            chunk_size,
            provider,
            buffers,
        })
    }

    fn hw_format(&self) -> HwFormat {
        HwFormat::Unsigned32 { range: self.range }
    }

    fn run_pwm(&self) {
        mmio::peripheral_entry();
        let _ = self.clock.start_rate(CLOCK_RATE_HZ);
        write32_delayed(PWM_RNG1, self.range);
        write32_delayed(PWM_RNG2, self.range);
        write32_delayed(
            PWM_CTL,
            CTL_PWEN1 | CTL_USEF1 | CTL_PWEN2 | CTL_USEF2 | CTL_CLRF1,
        );
        mmio::peripheral_exit();
    }

    fn stop_pwm(&self) {
        mmio::peripheral_entry();
        unsafe {
            write32(PWM_DMAC, 0);
            write32(PWM_CTL, 0);
        }
        self.clock.stop();
        mmio::peripheral_exit();
    }

    fn fill_buffer(&self, index: u8) -> bool {
        let addr = self.buffers[index as usize] as *mut u32;
        let slice = unsafe { core::slice::from_raw_parts_mut(addr, self.chunk_size) };
        let written = self.provider.get_chunk(slice);
        written > 0
    }

    pub fn start(&mut self) -> bool {
        self.run_pwm();
        let chunk_size = self.chunk_size;
        let ok = self.base.start(|buf| self.fill_buffer(buf));
        if !ok {
            return false;
        }

        self.dma.set_completion_routine(pwm_irq_trampoline, self as *const Self as *mut ());

        unsafe {
            mmio::peripheral_entry();
            write32(PWM_DMAC, DMAC_ENAB | (7 << 8) | 7);
            write32(PWM_CTL, read32(PWM_CTL) & !(CTL_RPTL1 | CTL_RPTL2));
            mmio::peripheral_exit();
        }

        let _ = self.dma.start();
        let _ = chunk_size;
        true
    }

    pub fn cancel(&self) {
        self.base.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    /// Invoked (via [`pwm_irq_trampoline`]) from the DMA channel's own
    /// completion dispatch once it has acknowledged the interrupt and
    /// derived success/buffer index; this only runs the sound state
    /// machine on top.
    fn handle_completion(&self, completed_buffer: u8, success: bool) {
        if !success {
            self.base.set_error();
            return;
        }
        let dma = &self.dma;
        self.base.on_irq(
            completed_buffer,
            |buf| self.fill_buffer(buf),
            || dma.cancel(),
        );
        if self.base.state() == State::Terminating {
            mmio::peripheral_entry();
            unsafe { write32(PWM_CTL, read32(PWM_CTL) | CTL_RPTL1 | CTL_RPTL2) };
            mmio::peripheral_exit();
        }
    }
}

fn write32_delayed(addr: usize, value: u32) {
    unsafe { write32(addr, value) };
    let timeout = Timeout::from_us(2000);
    crate::time::poll_until(timeout, || false);
}

fn pwm_fifo_bus_address() -> u32 {
    bus_address((PWM_FIF1 - PERIPHERAL_BASE) as u32)
}

fn pwm_irq_trampoline(_channel: u32, buffer_index: u32, success: bool, param: *mut ()) {
    let device = unsafe { &*(param as *const PwmSoundDevice) };
    device.handle_completion(buffer_index as u8, success);
}
