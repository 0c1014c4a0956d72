//! xHCI slot/event/command management (spec §4.5 "xHCI manager").
//!
//! TRB construction and event parsing are kept as plain, pure functions
//! so the command protocol (spec §4.5 "Device initialization sequence")
//! is testable without a real controller; [`SlotManager`] and
//! [`CommandRing`]/[`EventManager`] hold the small amounts of state
//! (slot bitmask, device-context base-address array, ring cycle state)
//! that *do* need a stateful owner, grounded on
//! `original_source/lib/usb/xhcidevice.cpp`'s `CXHCISlotManager`/
//! `CXHCIEventManager`/`CXHCICommandManager` triad.

use super::ring::{EventRing, ProducerRing};
use super::trb::{control_bits, CompletionCode, Trb, TrbType};

pub const MAX_SLOTS: usize = 16;

// --- TRB construction (spec §4.5 "Device initialization sequence") ---

pub fn build_enable_slot_trb() -> Trb {
    Trb {
        parameter: 0,
        status: 0,
        control: TrbType::EnableSlotCommand.control_bits(),
    }
}

pub fn build_disable_slot_trb(slot_id: u8) -> Trb {
    Trb {
        parameter: 0,
        status: 0,
        control: TrbType::DisableSlotCommand.control_bits() | ((slot_id as u32) << 24),
    }
}

/// `bsr` (Block Set Address Request) is used only for the first,
/// 8-byte-descriptor-fetch Address-Device call before the full device
/// descriptor is known.
pub fn build_address_device_trb(input_ctx_addr: u64, slot_id: u8) -> Trb {
    Trb {
        parameter: input_ctx_addr,
        status: 0,
        control: TrbType::AddressDeviceCommand.control_bits() | ((slot_id as u32) << 24),
    }
}

pub fn build_evaluate_context_trb(input_ctx_addr: u64, slot_id: u8) -> Trb {
    Trb {
        parameter: input_ctx_addr,
        status: 0,
        control: TrbType::EvaluateContextCommand.control_bits() | ((slot_id as u32) << 24),
    }
}

pub fn build_configure_endpoint_trb(input_ctx_addr: u64, slot_id: u8) -> Trb {
    Trb {
        parameter: input_ctx_addr,
        status: 0,
        control: TrbType::ConfigureEndpointCommand.control_bits() | ((slot_id as u32) << 24),
    }
}

pub fn build_reset_endpoint_trb(slot_id: u8, endpoint_id: u8) -> Trb {
    Trb {
        parameter: 0,
        status: 0,
        control: TrbType::ResetEndpointCommand.control_bits()
            | ((endpoint_id as u32) << 16)
            | ((slot_id as u32) << 24),
    }
}

/// `dcs` is the Dequeue Cycle State the endpoint's transfer ring is
/// currently at; bit 0 of `dequeue_ptr` carries it, matching the xHCI
/// field packing (the low 4 bits of the parameter are reserved/DCS).
pub fn build_set_tr_dequeue_pointer_trb(slot_id: u8, endpoint_id: u8, dequeue_ptr: u64, dcs: bool) -> Trb {
    Trb {
        parameter: (dequeue_ptr & !0xF) | if dcs { 1 } else { 0 },
        status: 0,
        control: TrbType::SetTrDequeuePointerCommand.control_bits()
            | ((endpoint_id as u32) << 16)
            | ((slot_id as u32) << 24),
    }
}

// --- Event parsing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CommandCompletion {
        command_trb_ptr: u64,
        completion_code: CompletionCode,
        slot_id: u8,
    },
    TransferEvent {
        trb_ptr: u64,
        completion_code: CompletionCode,
        slot_id: u8,
        endpoint_id: u8,
        transfer_length: u32,
    },
    PortStatusChange {
        port_id: u8,
    },
    Other,
}

pub fn parse_event(trb: &Trb) -> Event {
    let trb_type = trb.trb_type_bits();
    if trb_type == TrbType::CommandCompletionEvent as u32 {
        Event::CommandCompletion {
            command_trb_ptr: trb.parameter,
            completion_code: trb.completion_code(),
            slot_id: trb.slot_id(),
        }
    } else if trb_type == TrbType::TransferEvent as u32 {
        Event::TransferEvent {
            trb_ptr: trb.parameter,
            completion_code: trb.completion_code(),
            slot_id: trb.slot_id(),
            endpoint_id: ((trb.control >> 16) & 0x1F) as u8,
            transfer_length: trb.status & 0x00FF_FFFF,
        }
    } else if trb_type == TrbType::PortStatusChangeEvent as u32 {
        Event::PortStatusChange {
            port_id: ((trb.parameter >> 24) & 0xFF) as u8,
        }
    } else {
        Event::Other
    }
}

// --- Slot manager ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    Exhausted,
    NotAllocated,
    OutOfRange,
}

/// Owns the device-context base-address array (spec §4.5 step 2:
/// "program its pointer into the device-context base-address array")
/// and the slot-ID allocation bitmask.
pub struct SlotManager {
    max_slots: u8,
    allocated: u32,
    device_contexts: [u64; MAX_SLOTS + 1],
}

impl SlotManager {
    pub const fn new(max_slots: u8) -> Self {
        Self {
            max_slots,
            allocated: 0,
            device_contexts: [0; MAX_SLOTS + 1],
        }
    }

    /// Record a slot ID the controller reported via a successful
    /// Enable-Slot command completion.
    pub fn mark_allocated(&mut self, slot_id: u8) -> Result<(), SlotError> {
        if slot_id == 0 || slot_id as usize > self.max_slots as usize {
            return Err(SlotError::OutOfRange);
        }
        self.allocated |= 1 << slot_id;
        Ok(())
    }

    pub fn free(&mut self, slot_id: u8) -> Result<(), SlotError> {
        if self.allocated & (1 << slot_id) == 0 {
            return Err(SlotError::NotAllocated);
        }
        self.allocated &= !(1 << slot_id);
        self.device_contexts[slot_id as usize] = 0;
        Ok(())
    }

    pub fn is_allocated(&self, slot_id: u8) -> bool {
        (slot_id as usize) <= MAX_SLOTS && self.allocated & (1 << slot_id) != 0
    }

    pub fn set_device_context(&mut self, slot_id: u8, addr: u64) -> Result<(), SlotError> {
        if !self.is_allocated(slot_id) {
            return Err(SlotError::NotAllocated);
        }
        self.device_contexts[slot_id as usize] = addr;
        Ok(())
    }

    pub fn device_context(&self, slot_id: u8) -> Option<u64> {
        self.is_allocated(slot_id).then(|| self.device_contexts[slot_id as usize])
    }
}

// --- Command ring / event manager ring-state wrappers ---

/// Thin state wrapper tying a [`ProducerRing`]'s cycle/wrap bookkeeping
/// to the command ring's one-at-a-time semantics: a command is posted,
/// the doorbell rung, and the caller polls [`EventManager`] for the
/// matching `CommandCompletion`.
pub struct CommandRing {
    ring: ProducerRing,
}

impl CommandRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ProducerRing::new(capacity),
        }
    }

    /// Returns the slot index the caller should write `trb` (already
    /// built by one of the `build_*_trb` functions above) to, after
    /// stamping its cycle bit via [`ProducerRing::stamp`].
    pub fn next_slot(&mut self, trb: &mut Trb) -> usize {
        let slot = self.ring.enqueue();
        self.ring.stamp(trb, &slot);
        slot.index()
    }
}

/// Consumer-side wrapper around [`EventRing`] plus the small per-poll
/// dispatch spec §4.5 describes ("the driver polls the event ring from
/// its ISR and dispatches by event type").
pub struct EventManager {
    ring: EventRing,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: EventRing::new(capacity),
        }
    }

    /// Given the TRB currently at the consumer's dequeue position,
    /// returns the parsed event and advances if it was new, or `None`
    /// if the ring is caught up (cycle bit stale).
    pub fn poll(&mut self, trb_at_dequeue: &Trb) -> Option<Event> {
        if self.ring.poll(trb_at_dequeue) {
            Some(parse_event(trb_at_dequeue))
        } else {
            None
        }
    }

    pub fn dequeue_index(&self) -> usize {
        self.ring.dequeue_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_manager_allocate_free_roundtrip() {
        let mut sm = SlotManager::new(8);
        sm.mark_allocated(3).unwrap();
        assert!(sm.is_allocated(3));
        sm.set_device_context(3, 0x1000).unwrap();
        assert_eq!(sm.device_context(3), Some(0x1000));

        sm.free(3).unwrap();
        assert!(!sm.is_allocated(3));
        assert_eq!(sm.device_context(3), None);
    }

    #[test]
    fn slot_manager_rejects_double_free() {
        let mut sm = SlotManager::new(8);
        assert_eq!(sm.free(1), Err(SlotError::NotAllocated));
    }

    #[test]
    fn slot_manager_rejects_out_of_range_slot() {
        let mut sm = SlotManager::new(4);
        assert_eq!(sm.mark_allocated(5), Err(SlotError::OutOfRange));
    }

    #[test]
    fn parse_event_decodes_command_completion() {
        let trb = Trb {
            parameter: 0xDEAD_0000,
            status: (CompletionCode::Success as u32 /* placeholder, overwritten below */) << 24,
            control: TrbType::CommandCompletionEvent.control_bits() | (7 << 24),
        };
        let mut trb = trb;
        trb.status = 1 << 24; // CompletionCode::Success bit pattern
        match parse_event(&trb) {
            Event::CommandCompletion { command_trb_ptr, completion_code, slot_id } => {
                assert_eq!(command_trb_ptr, 0xDEAD_0000);
                assert!(completion_code.is_success());
                assert_eq!(slot_id, 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_event_decodes_transfer_event_fields() {
        let mut trb = Trb::zeroed();
        trb.parameter = 0x2000;
        trb.status = (6u32 << 24) | 128; // StallError, 128 bytes remaining
        trb.control = TrbType::TransferEvent.control_bits() | (3 << 16) | (5 << 24);
        match parse_event(&trb) {
            Event::TransferEvent { trb_ptr, completion_code, slot_id, endpoint_id, transfer_length } => {
                assert_eq!(trb_ptr, 0x2000);
                assert_eq!(completion_code, CompletionCode::StallError);
                assert_eq!(slot_id, 5);
                assert_eq!(endpoint_id, 3);
                assert_eq!(transfer_length, 128);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn command_ring_stamps_cycle_bit_before_wrap() {
        let mut cmd_ring = CommandRing::new(2);
        let mut trb = build_enable_slot_trb();
        let index = cmd_ring.next_slot(&mut trb);
        assert_eq!(index, 0);
        assert!(trb.control & control_bits::CYCLE != 0);
    }

    #[test]
    fn event_manager_dispatches_port_status_change() {
        let mut em = EventManager::new(2);
        let mut trb = Trb::zeroed();
        trb.parameter = (4u64) << 24;
        trb.control = TrbType::PortStatusChangeEvent.control_bits() | control_bits::CYCLE;
        match em.poll(&trb) {
            Some(Event::PortStatusChange { port_id }) => assert_eq!(port_id, 4),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
