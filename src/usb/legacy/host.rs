//! Legacy host controller channel engine (spec §4.4 "Transaction
//! lifecycle"): a pool of hardware channels, each driving one
//! [`StageData`] through retries, split phases, and retirement.
//!
//! The hardware-channel pool mirrors [`crate::dma::pool::ChannelPool`]'s
//! atomic-bitmask allocation (spec §5: "DMA channel allocation: atomic
//! bitmask operations; callers own a channel for its lifetime" applies
//! equally to the legacy HC's channel set). Register programming for a
//! channel (endpoint/PID/split fields written to the channel's
//! characteristics register) is the caller's job once a channel is
//! assigned; this module owns only the retry/reschedule/retire state
//! machine spec §4.4 describes, so it is testable against a fake
//! sequence of interrupt statuses rather than a real DWC2 controller.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::usb::core::UsbError;
use crate::usb::legacy::stage::{Outcome, StageData};

/// Hardware channels available on the legacy host controller.
pub const MAX_CHANNELS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// No free hardware channel.
    Exhausted,
    /// The referenced channel has no transfer in progress.
    NotActive,
}

/// Bitmask allocator for the legacy HC's hardware channel set.
pub struct HcChannelPool {
    allocated: AtomicU32,
}

impl HcChannelPool {
    pub const fn new() -> Self {
        Self {
            allocated: AtomicU32::new(0),
        }
    }

    pub fn allocate(&self) -> Result<u32, EngineError> {
        for channel in 0..MAX_CHANNELS {
            let bit = 1 << channel;
            if self.allocated.fetch_or(bit, Ordering::AcqRel) & bit == 0 {
                return Ok(channel);
            }
        }
        Err(EngineError::Exhausted)
    }

    pub fn free(&self, channel: u32) {
        self.allocated.fetch_and(!(1 << channel), Ordering::AcqRel);
    }
}

impl Default for HcChannelPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a transaction sequence reaching a terminal state (spec
/// §4.4 step 5: "retire the URB, invoke the completion callback").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retirement {
    pub result_len: u32,
    pub status: bool,
    pub usb_error: Option<UsbError>,
}

/// One slot in the channel engine: the hardware channel number plus
/// its in-progress [`StageData`], if any.
struct ChannelSlot {
    stage: Option<StageData>,
}

/// Drives up to [`MAX_CHANNELS`] concurrent transactions through the
/// dispatch table in spec §4.4 step 3 ("Dispatch by bits (in priority
/// order)").
pub struct ChannelEngine {
    pool: HcChannelPool,
    slots: [ChannelSlot; MAX_CHANNELS as usize],
}

/// What the caller (the actual DWC2 register-programming code) should
/// do after [`ChannelEngine::on_interrupt`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    /// Re-arm the same channel for another attempt (retry, or the next
    /// split phase / micro-frame).
    Resubmit,
    /// The transfer is finished; free the channel and hand the
    /// retirement back to the caller's completion callback.
    Retire(Retirement),
}

impl ChannelEngine {
    pub const fn new() -> Self {
        const EMPTY: ChannelSlot = ChannelSlot { stage: None };
        Self {
            pool: HcChannelPool::new(),
            slots: [EMPTY; MAX_CHANNELS as usize],
        }
    }

    /// spec §4.4 step 1: "picks a free hardware channel, builds stage
    /// data, programs the channel registers, and starts it." The
    /// register programming itself is the caller's responsibility;
    /// this just reserves the channel and stores the stage data.
    pub fn transfer(&mut self, stage: StageData) -> Result<u32, EngineError> {
        let channel = self.pool.allocate()?;
        self.slots[channel as usize].stage = Some(stage);
        Ok(channel)
    }

    /// spec §4.4 steps 2-5: interpret one interrupt for `channel`.
    /// `packets_left`/`bytes_left` are the channel's residual-count
    /// registers at the time of the interrupt.
    pub fn on_interrupt(
        &mut self,
        channel: u32,
        status: u32,
        packets_left: u32,
        bytes_left: u32,
    ) -> Result<EngineAction, EngineError> {
        let slot = &mut self.slots[channel as usize];
        let stage = slot.stage.as_mut().ok_or(EngineError::NotActive)?;

        let outcome = stage.transaction_complete(status, packets_left, bytes_left);
        match outcome {
            Outcome::Continue | Outcome::Retry | Outcome::Reschedule => Ok(EngineAction::Resubmit),
            Outcome::Complete => {
                let retirement = Retirement {
                    result_len: stage.result_len(),
                    status: true,
                    usb_error: None,
                };
                slot.stage = None;
                self.pool.free(channel);
                Ok(EngineAction::Retire(retirement))
            }
            Outcome::Fail(err) => {
                let retirement = Retirement {
                    result_len: stage.result_len(),
                    status: false,
                    usb_error: Some(err),
                };
                slot.stage = None;
                self.pool.free(channel);
                Ok(EngineAction::Retire(retirement))
            }
        }
    }

    /// spec §5 "Timeouts": "Checked by the scheduler tick; an expired
    /// URB is retired with `Timeout`." Called once per scheduler tick
    /// with the current channel's stage data inspected for an expired
    /// deadline; returns the channels that timed out this tick so the
    /// caller can abort their hardware transaction and free the slot.
    pub fn expired_channels(&self) -> heapless::Vec<u32, { MAX_CHANNELS as usize }> {
        let mut expired = heapless::Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(stage) = &slot.stage {
                if stage.is_timeout() {
                    let _ = expired.push(i as u32);
                }
            }
        }
        expired
    }

    pub fn retire_timeout(&mut self, channel: u32) -> Result<Retirement, EngineError> {
        let slot = &mut self.slots[channel as usize];
        if slot.stage.take().is_none() {
            return Err(EngineError::NotActive);
        }
        self.pool.free(channel);
        Ok(Retirement {
            result_len: 0,
            status: false,
            usb_error: Some(UsbError::Timeout),
        })
    }

    pub fn is_active(&self, channel: u32) -> bool {
        self.slots[channel as usize].stage.is_some()
    }
}

impl Default for ChannelEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::core::{Direction, EndpointType, UsbSpeed};
    use crate::usb::legacy::stage::STATUS_XFER_COMPLETE;

    fn bulk_stage(len: u32) -> StageData {
        StageData::new(Direction::In, EndpointType::Bulk, UsbSpeed::High, 512, len, false, false, false, None)
    }

    #[test]
    fn transfer_allocates_and_retire_frees_channel() {
        let mut engine = ChannelEngine::new();
        let ch = engine.transfer(bulk_stage(512)).unwrap();
        assert!(engine.is_active(ch));

        let action = engine.on_interrupt(ch, STATUS_XFER_COMPLETE, 0, 0).unwrap();
        match action {
            EngineAction::Retire(r) => {
                assert!(r.status);
                assert_eq!(r.result_len, 512);
            }
            EngineAction::Resubmit => panic!("expected retirement"),
        }
        assert!(!engine.is_active(ch));
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut engine = ChannelEngine::new();
        for _ in 0..MAX_CHANNELS {
            engine.transfer(bulk_stage(64)).unwrap();
        }
        assert_eq!(engine.transfer(bulk_stage(64)), Err(EngineError::Exhausted));
    }

    #[test]
    fn unknown_channel_interrupt_is_rejected() {
        let mut engine = ChannelEngine::new();
        assert_eq!(
            engine.on_interrupt(0, STATUS_XFER_COMPLETE, 0, 0),
            Err(EngineError::NotActive)
        );
    }

    #[test]
    fn short_transfer_resubmits_until_complete() {
        let mut engine = ChannelEngine::new();
        let ch = engine.transfer(bulk_stage(1024)).unwrap();
        let action = engine.on_interrupt(ch, STATUS_XFER_COMPLETE, 1, 512).unwrap();
        assert_eq!(action, EngineAction::Resubmit);
        assert!(engine.is_active(ch));

        let action2 = engine.on_interrupt(ch, STATUS_XFER_COMPLETE, 0, 0).unwrap();
        assert!(matches!(action2, EngineAction::Retire(_)));
    }
}
