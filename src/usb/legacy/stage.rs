//! Legacy host controller transfer-stage data (spec §4.4 "A transfer is
//! represented by a stage data object").
//!
//! Grounded on `CDWHCITransferStageData` in
//! `original_source/lib/usb/dwhcixferstagedata.cpp`: one stage-data
//! instance per hardware channel transaction, tracking packet/byte
//! bookkeeping across retries and split-transaction phases so the
//! channel engine only has to interpret one `TransactionComplete`-style
//! call per interrupt.

use crate::usb::core::{Direction, EndpointType, UsbError, UsbSpeed, MAX_BULK_RETRIES, MAX_ISO_SPLIT_PAYLOAD};
use crate::usb::legacy::scheduler::{FrameScheduler, SchedulerKind};
use crate::time::Timeout;

pub const STATUS_XFER_COMPLETE: u32 = 1 << 0;
pub const STATUS_HALTED: u32 = 1 << 1;
pub const STATUS_AHB_ERROR: u32 = 1 << 2;
pub const STATUS_STALL: u32 = 1 << 3;
pub const STATUS_NAK: u32 = 1 << 4;
pub const STATUS_ACK: u32 = 1 << 5;
pub const STATUS_NYET: u32 = 1 << 6;
pub const STATUS_XACT_ERROR: u32 = 1 << 7;
pub const STATUS_BABBLE_ERROR: u32 = 1 << 8;
pub const STATUS_FRAME_OVERRUN: u32 = 1 << 9;
pub const STATUS_DATA_TOGGLE_ERROR: u32 = 1 << 10;

const STATUS_ERROR_MASK: u32 = STATUS_AHB_ERROR
    | STATUS_STALL
    | STATUS_XACT_ERROR
    | STATUS_BABBLE_ERROR
    | STATUS_FRAME_OVERRUN
    | STATUS_DATA_TOGGLE_ERROR;

/// What a completed transaction should do next, derived from the
/// status bits by [`StageData::transaction_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep going: more packets remain in this stage.
    Continue,
    /// The stage is done; retire the URB successfully.
    Complete,
    /// A terminal error occurred; retire the URB with this error.
    Fail(UsbError),
    /// A transient error occurred and the hardware channel should
    /// retry the same transaction.
    Retry,
    /// NAK/NYET on a non-interrupt transfer: reschedule for the next
    /// (micro)frame without consuming a retry.
    Reschedule,
}

pub struct StageData {
    pub direction: Direction,
    pub endpoint_type: EndpointType,
    pub speed: UsbSpeed,
    pub is_status_stage: bool,
    pub complete_on_nak: bool,

    max_packet_size: u32,
    transfer_size: u32,
    bytes_per_transaction: u32,
    packets: u32,
    packets_per_transaction: u32,
    total_bytes_transferred: u32,

    is_split: bool,
    split_complete: bool,
    scheduler: Option<FrameScheduler>,

    error_count: u32,
    transaction_status: u32,

    timeout: Option<Timeout>,
}

impl StageData {
    pub fn new(
        direction: Direction,
        endpoint_type: EndpointType,
        speed: UsbSpeed,
        max_packet_size: u32,
        transfer_size: u32,
        is_status_stage: bool,
        is_split: bool,
        hub_root_port: bool,
        timeout_ms: Option<u32>,
    ) -> Self {
        let (bytes_per_transaction, packets, packets_per_transaction) = if is_status_stage {
            (0, 1, 1)
        } else {
            let packets = transfer_size.div_ceil(max_packet_size.max(1));
            if is_split {
                let bytes = if endpoint_type == EndpointType::Isochronous {
                    if direction == Direction::Out && transfer_size > MAX_ISO_SPLIT_PAYLOAD as u32 {
                        MAX_ISO_SPLIT_PAYLOAD as u32
                    } else {
                        transfer_size
                    }
                } else if transfer_size > max_packet_size {
                    max_packet_size
                } else {
                    transfer_size
                };
                (bytes, packets, 1)
            } else {
                (transfer_size, packets, packets)
            }
        };

        let scheduler = if is_split {
            let kind = if endpoint_type == EndpointType::Isochronous {
                SchedulerKind::Isochronous
            } else if endpoint_type.is_periodic() {
                SchedulerKind::Periodic
            } else {
                SchedulerKind::NonPeriodic
            };
            Some(FrameScheduler::new(kind))
        } else if hub_root_port && speed != UsbSpeed::High {
            Some(FrameScheduler::new(SchedulerKind::NoSplit))
        } else {
            None
        };

        Self {
            direction,
            endpoint_type,
            speed,
            is_status_stage,
            complete_on_nak: false,
            max_packet_size,
            transfer_size,
            bytes_per_transaction,
            packets,
            packets_per_transaction,
            total_bytes_transferred: 0,
            is_split,
            split_complete: false,
            scheduler,
            error_count: 0,
            transaction_status: 0,
            timeout: timeout_ms.map(|ms| Timeout::from_ms(ms as u64)),
        }
    }

    pub fn is_isochronous(&self) -> bool {
        self.endpoint_type == EndpointType::Isochronous
    }

    pub fn is_periodic(&self) -> bool {
        self.endpoint_type.is_periodic()
    }

    pub fn scheduler_mut(&mut self) -> Option<&mut FrameScheduler> {
        self.scheduler.as_mut()
    }

    pub fn set_split_complete(&mut self, complete: bool) {
        self.split_complete = complete;
    }

    pub fn is_split_complete(&self) -> bool {
        self.split_complete
    }

    pub fn bytes_to_transfer(&self) -> u32 {
        self.bytes_per_transaction
    }

    pub fn packets_to_transfer(&self) -> u32 {
        self.packets_per_transaction
    }

    pub fn result_len(&self) -> u32 {
        self.total_bytes_transferred.min(self.transfer_size)
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout.is_some_and(|t| t.is_expired())
    }

    /// `GetStatusMask`: which status bits this stage cares about.
    pub fn status_mask(&self) -> u32 {
        let mut mask = STATUS_XFER_COMPLETE | STATUS_HALTED | STATUS_ERROR_MASK;
        if self.is_split || self.is_periodic() {
            mask |= STATUS_ACK | STATUS_NAK | STATUS_NYET;
        }
        mask
    }

    fn usb_error(&self) -> UsbError {
        if self.transaction_status & STATUS_STALL != 0 {
            UsbError::Stall
        } else if self.transaction_status & STATUS_XACT_ERROR != 0 {
            UsbError::Transaction
        } else if self.transaction_status & STATUS_BABBLE_ERROR != 0 {
            UsbError::Babble
        } else if self.transaction_status & STATUS_FRAME_OVERRUN != 0 {
            UsbError::FrameOverrun
        } else if self.transaction_status & STATUS_DATA_TOGGLE_ERROR != 0 {
            UsbError::DataToggle
        } else if self.transaction_status & STATUS_AHB_ERROR != 0 {
            UsbError::HostBus
        } else {
            UsbError::Unknown
        }
    }

    /// spec §4.4 step 3-4: dispatch by status bits, update byte/packet
    /// bookkeeping, and report what the channel engine should do next.
    pub fn transaction_complete(&mut self, status: u32, packets_left: u32, bytes_left: u32) -> Outcome {
        self.transaction_status = status;

        if status & (STATUS_ERROR_MASK | STATUS_NAK | STATUS_NYET) != 0 {
            if status & STATUS_NAK != 0 && self.complete_on_nak {
                self.packets = 0;
                return Outcome::Complete;
            }

            if status & STATUS_STALL != 0 || status & STATUS_BABBLE_ERROR != 0 || status & STATUS_DATA_TOGGLE_ERROR != 0 {
                return Outcome::Fail(self.usb_error());
            }

            if status & STATUS_XACT_ERROR != 0 && self.endpoint_type == EndpointType::Bulk {
                self.error_count += 1;
                if self.error_count > MAX_BULK_RETRIES {
                    return Outcome::Fail(UsbError::Transaction);
                }
                return Outcome::Retry;
            }

            if status & (STATUS_NAK | STATUS_NYET) != 0 {
                return Outcome::Reschedule;
            }

            return Outcome::Fail(self.usb_error());
        }

        let packets_transferred = self.packets_per_transaction - packets_left;
        let mut bytes_transferred = self.bytes_per_transaction - bytes_left;

        if bytes_transferred == 0 && self.bytes_per_transaction > 0 {
            if self.is_split && self.split_complete {
                bytes_transferred = self.max_packet_size * packets_transferred;
            } else if self.is_isochronous() {
                bytes_transferred = self.bytes_per_transaction * packets_transferred;
            }
        }

        self.total_bytes_transferred += bytes_transferred;

        if packets_transferred > self.packets {
            self.error_count = MAX_BULK_RETRIES + 1;
            self.packets = 0;
            return Outcome::Fail(UsbError::FrameOverrun);
        }
        self.packets -= packets_transferred;

        if !self.is_split && !self.is_isochronous() {
            self.packets_per_transaction = self.packets;
        }

        if self.packets == 0 {
            Outcome::Complete
        } else {
            if self.transfer_size - self.total_bytes_transferred < self.bytes_per_transaction {
                self.bytes_per_transaction = self.transfer_size - self.total_bytes_transferred;
            }
            Outcome::Continue
        }
    }

    pub fn is_retry_ok(&self) -> bool {
        self.error_count <= MAX_BULK_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_stage(transfer_size: u32) -> StageData {
        StageData::new(
            Direction::In,
            EndpointType::Bulk,
            UsbSpeed::High,
            512,
            transfer_size,
            false,
            false,
            false,
            None,
        )
    }

    #[test]
    fn full_transfer_in_one_go_completes() {
        let mut s = bulk_stage(512);
        let outcome = s.transaction_complete(STATUS_XFER_COMPLETE, 0, 0);
        assert_eq!(outcome, Outcome::Complete);
        assert_eq!(s.result_len(), 512);
    }

    #[test]
    fn short_packet_keeps_remaining_packets_pending() {
        let mut s = bulk_stage(1024);
        assert_eq!(s.packets_to_transfer(), 2);
        let outcome = s.transaction_complete(STATUS_XFER_COMPLETE, 1, 512);
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(s.packets_to_transfer(), 1);
    }

    #[test]
    fn xact_error_on_bulk_retries_until_limit() {
        let mut s = bulk_stage(512);
        for _ in 0..MAX_BULK_RETRIES {
            assert_eq!(s.transaction_complete(STATUS_XACT_ERROR, 1, 512), Outcome::Retry);
        }
        assert_eq!(
            s.transaction_complete(STATUS_XACT_ERROR, 1, 512),
            Outcome::Fail(UsbError::Transaction)
        );
    }

    #[test]
    fn stall_fails_immediately_without_retry() {
        let mut s = bulk_stage(512);
        assert_eq!(s.transaction_complete(STATUS_STALL, 1, 512), Outcome::Fail(UsbError::Stall));
    }

    #[test]
    fn nak_on_complete_on_nak_interrupt_urb_retires_with_zero_bytes() {
        let mut s = StageData::new(
            Direction::In,
            EndpointType::Interrupt,
            UsbSpeed::Full,
            8,
            8,
            false,
            false,
            false,
            None,
        );
        s.complete_on_nak = true;
        assert_eq!(s.transaction_complete(STATUS_NAK, 1, 8), Outcome::Complete);
        assert_eq!(s.result_len(), 0);
    }

    #[test]
    fn nak_on_bulk_reschedules_without_consuming_retry_budget() {
        let mut s = bulk_stage(512);
        assert_eq!(s.transaction_complete(STATUS_NAK, 1, 512), Outcome::Reschedule);
        assert!(s.is_retry_ok());
    }
}
