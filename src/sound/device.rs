//! The sound back-end state machine shared by the PWM and I²S
//! peripherals (spec §4.3 "Back-end state machine").
//!
//! This module owns the chunk-provider / double-buffer bookkeeping and
//! the `Idle -> Running -> {Cancelled, Terminating} -> Idle` lifecycle;
//! [`crate::sound::pwm`] and [`crate::sound::i2s`] each wrap it with
//! the register programming their peripheral needs and call
//! [`BaseDevice::fill_buffer`]/[`BaseDevice::on_irq`] from their own
//! `start`/`InterruptHandler` equivalents.

use spin::Mutex;

use super::format::HwFormat;
use super::queue::Queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Cancelled,
    Terminating,
    Error,
}

/// Where a chunk comes from: the shared queue by default, or an
/// application-supplied generator (spec §8 scenario: "Provide a
/// `get_chunk` returning a 1 kHz square wave").
pub trait ChunkProvider: Send + Sync {
    /// Fill `out` with up to `out.len()` hardware-format words. Returns
    /// the count actually written; `0` means stream end.
    fn get_chunk(&self, out: &mut [u32]) -> usize;
}

/// The default provider: pulls from a [`Queue`], padding any shortfall
/// with silence (spec §4.3 "Underrun behavior") rather than signalling
/// stream end, since a live queue merely running dry is not the same
/// as the stream finishing.
pub struct QueueProvider<'a> {
    pub queue: &'a Queue,
    pub hw_format: HwFormat,
}

impl<'a> ChunkProvider for QueueProvider<'a> {
    fn get_chunk(&self, out: &mut [u32]) -> usize {
        let mut samples = alloc::vec![0i32; out.len()];
        let frames_filled = self.queue.read_frames(&mut samples);
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if i < frames_filled {
                self.hw_format.encode_unsigned32_or_signed16(samples[i])
            } else {
                self.hw_format.silence()
            };
        }
        out.len()
    }
}

/// Shared state machine. Generic over the two in-flight buffer slots a
/// back end double-buffers into; the back end itself owns the actual
/// DMA control blocks and only asks this type what should go in each
/// one.
pub struct BaseDevice {
    state: Mutex<State>,
    next_buffer: Mutex<u8>,
}

impl BaseDevice {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
            next_buffer: Mutex::new(0),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() != State::Idle
    }

    /// spec §4.3: `start()` fills buffer 0, then buffer 1; if buffer 1
    /// comes back empty the stream ends immediately (`Terminating`)
    /// rather than entering `Running`. Returns `false` if buffer 0
    /// itself was empty (nothing to start).
    ///
    /// `fill` is called once per buffer with the buffer index; it
    /// returns `true` if that buffer got data, `false` at stream end.
    pub fn start(&self, mut fill: impl FnMut(u8) -> bool) -> bool {
        *self.next_buffer.lock() = 0;
        if !fill(0) {
            return false;
        }
        *self.state.lock() = State::Running;
        if !fill(1) {
            *self.state.lock() = State::Terminating;
        }
        true
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == State::Running {
            *state = State::Cancelled;
        }
    }

    pub fn set_error(&self) {
        *self.state.lock() = State::Error;
    }

    /// spec §4.3 IRQ dispatch table, parameterized by `fill` (refill
    /// the just-completed buffer) and `break_chain` (detach the DMA
    /// chain so it stops after the in-flight block).
    pub fn on_irq(&self, completed_buffer: u8, mut fill: impl FnMut(u8) -> bool, mut break_chain: impl FnMut()) {
        let mut state = self.state.lock();
        match *state {
            State::Running => {
                if !fill(completed_buffer) {
                    break_chain();
                    *state = State::Terminating;
                }
            }
            State::Cancelled => {
                break_chain();
                *state = State::Terminating;
            }
            State::Terminating => {
                *state = State::Idle;
            }
            State::Idle | State::Error => {}
        }
    }
}

impl Default for BaseDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    #[test]
    fn start_with_data_in_both_buffers_runs() {
        let dev = BaseDevice::new();
        let ok = dev.start(|_buf| true);
        assert!(ok);
        assert_eq!(dev.state(), State::Running);
    }

    #[test]
    fn start_with_empty_buffer1_goes_terminating() {
        let dev = BaseDevice::new();
        let ok = dev.start(|buf| buf == 0);
        assert!(ok);
        assert_eq!(dev.state(), State::Terminating);
    }

    #[test]
    fn start_with_empty_buffer0_fails_outright() {
        let dev = BaseDevice::new();
        let ok = dev.start(|_buf| false);
        assert!(!ok);
        assert_eq!(dev.state(), State::Idle);
    }

    #[test]
    fn running_irq_refills_until_chunk_provider_dries_up() {
        let dev = BaseDevice::new();
        dev.start(|_| true);
        assert_eq!(dev.state(), State::Running);

        let chain_broken = RefCell::new(false);
        dev.on_irq(0, |_| true, || *chain_broken.borrow_mut() = true);
        assert_eq!(dev.state(), State::Running);
        assert!(!*chain_broken.borrow());

        dev.on_irq(1, |_| false, || *chain_broken.borrow_mut() = true);
        assert_eq!(dev.state(), State::Terminating);
        assert!(*chain_broken.borrow());
    }

    #[test]
    fn cancelled_then_terminating_then_idle() {
        let dev = BaseDevice::new();
        dev.start(|_| true);
        dev.cancel();
        assert_eq!(dev.state(), State::Cancelled);

        let mut broke = false;
        dev.on_irq(0, |_| true, || broke = true);
        assert_eq!(dev.state(), State::Terminating);
        assert!(broke);

        dev.on_irq(0, |_| true, || {});
        assert_eq!(dev.state(), State::Idle);
    }

    #[test]
    fn cancel_while_idle_is_a_no_op() {
        let dev = BaseDevice::new();
        dev.cancel();
        assert_eq!(dev.state(), State::Idle);
    }
}
