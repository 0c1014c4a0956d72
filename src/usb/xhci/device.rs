//! xHCI device initialization sequence (spec §4.5 "Device
//! initialization sequence", "Route string", "Endpoint reset").
//!
//! Grounded on `original_source/lib/usb/xhcidevice.cpp`'s
//! `CXHCIDevice::Initialize`/enumeration path and
//! `xhciendpoint.cpp`'s halt-recovery sequence. The route string and
//! context-field builders are pure functions; [`InitSequence`] is the
//! five-step state machine spec §4.5 describes, parameterized over
//! callbacks so it can be driven by a fake controller in tests the way
//! spec §8 scenario 4 asks for ("Simulated hub reports ...").

use crate::usb::core::{EndpointType, UsbSpeed};

use super::manager::{
    build_address_device_trb, build_configure_endpoint_trb, build_enable_slot_trb,
    build_evaluate_context_trb, build_reset_endpoint_trb, build_set_tr_dequeue_pointer_trb,
};
use super::trb::Trb;

/// Maximum hub tiers a route string can address (spec §4.5: "5 tiers
/// maximum"), each contributing a 4-bit hex digit.
pub const MAX_ROUTE_TIERS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// The parent's route string already uses all 5 tiers.
    TooManyTiers,
    /// A hub port number does not fit in 4 bits (ports 1..15).
    PortOutOfRange,
}

/// spec §4.5 "Route string": append `port` to the next free 4-bit slot
/// of `parent_route`. A root-hub-attached device has `parent_route ==
/// 0` and contributes no tier of its own (the root port is carried
/// separately in the slot context).
pub fn append_route_tier(parent_route: u32, port: u8) -> Result<u32, RouteError> {
    if port == 0 || port > 0xF {
        return Err(RouteError::PortOutOfRange);
    }
    for tier in 0..MAX_ROUTE_TIERS {
        let shift = tier * 4;
        if (parent_route >> shift) & 0xF == 0 {
            return Ok(parent_route | ((port as u32) << shift));
        }
    }
    Err(RouteError::TooManyTiers)
}

/// Slot-context fields spec §4.5 step 3 asks for ("fill the slot
/// context (route string, speed, root-hub port ID, hub info for
/// high-speed hubs feeding LS/FS devices)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotContextFields {
    pub route_string: u32,
    pub speed: UsbSpeed,
    pub root_hub_port: u8,
    /// Present when this device hangs off a high-speed hub and is
    /// itself low/full-speed: the hub's slot ID and the port on the
    /// hub nearest this device, used by the controller's own
    /// transaction-translator routing.
    pub tt_hub_slot_and_port: Option<(u8, u8)>,
}

/// Endpoint-context fields spec §4.5 step 5 asks for ("max packet
/// size, EP type, interval, and the dequeue-pointer to the endpoint's
/// ring with the DCS bit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointContextFields {
    pub max_packet_size: u16,
    pub endpoint_type: EndpointType,
    pub interval: u32,
    pub ring_dequeue_ptr: u64,
    pub dequeue_cycle_state: bool,
}

impl EndpointContextFields {
    /// The packed `TR Dequeue Pointer` field: the ring address with the
    /// DCS bit folded into bit 0, matching how
    /// `build_set_tr_dequeue_pointer_trb` packs it for the command that
    /// later updates this same field after an endpoint reset.
    pub fn packed_dequeue_pointer(&self) -> u64 {
        (self.ring_dequeue_ptr & !0xF) | if self.dequeue_cycle_state { 1 } else { 0 }
    }
}

/// The five-step sequence from spec §4.5, expressed as an explicit
/// state machine driven one command at a time so a fake controller can
/// step it in tests without a real event ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    EnableSlot,
    AddressDeviceBsr,
    FetchFirst8Bytes,
    EvaluateContextMaxPacketSize,
    FetchFullDescriptors,
    ConfigureEndpoints,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    CommandFailed,
    NoSlotsAvailable,
}

/// Drives [`InitStep`] forward one command at a time; each `advance_*`
/// call corresponds to one posted command and its completion event,
/// mirroring spec §4.5's five numbered steps.
pub struct InitSequence {
    step: InitStep,
    slot_id: Option<u8>,
}

impl InitSequence {
    pub fn new() -> Self {
        Self {
            step: InitStep::EnableSlot,
            slot_id: None,
        }
    }

    pub fn step(&self) -> InitStep {
        self.step
    }

    pub fn slot_id(&self) -> Option<u8> {
        self.slot_id
    }

    /// Step 1: the command manager posts an Enable-Slot command and
    /// returns the new slot ID from its completion event.
    pub fn enable_slot_trb(&self) -> Trb {
        build_enable_slot_trb()
    }

    pub fn on_slot_enabled(&mut self, slot_id: u8) {
        self.slot_id = Some(slot_id);
        self.step = InitStep::AddressDeviceBsr;
    }

    /// Step 3: Address-Device with BSR (Block Set Address Request) set
    /// so the controller assigns only an internal context, not yet a
    /// USB device address, before the 8-byte descriptor fetch.
    pub fn address_device_bsr_trb(&self, input_ctx_addr: u64) -> Result<Trb, InitError> {
        let slot = self.slot_id.ok_or(InitError::CommandFailed)?;
        Ok(build_address_device_trb(input_ctx_addr, slot))
    }

    pub fn on_address_device_bsr_done(&mut self) {
        self.step = InitStep::FetchFirst8Bytes;
    }

    pub fn on_first_8_bytes_fetched(&mut self) {
        self.step = InitStep::EvaluateContextMaxPacketSize;
    }

    /// Step 4: Evaluate-Context to correct EP0's max packet size once
    /// the real value is known from the first 8 bytes of the device
    /// descriptor.
    pub fn evaluate_context_trb(&self, input_ctx_addr: u64) -> Result<Trb, InitError> {
        let slot = self.slot_id.ok_or(InitError::CommandFailed)?;
        Ok(build_evaluate_context_trb(input_ctx_addr, slot))
    }

    pub fn on_max_packet_size_evaluated(&mut self) {
        self.step = InitStep::FetchFullDescriptors;
    }

    pub fn on_full_descriptors_fetched(&mut self) {
        self.step = InitStep::ConfigureEndpoints;
    }

    /// Step 5: one Configure-Endpoint command per new interface's
    /// endpoint set.
    pub fn configure_endpoints_trb(&self, input_ctx_addr: u64) -> Result<Trb, InitError> {
        let slot = self.slot_id.ok_or(InitError::CommandFailed)?;
        Ok(build_configure_endpoint_trb(input_ctx_addr, slot))
    }

    pub fn on_endpoints_configured(&mut self) {
        self.step = InitStep::Done;
    }

    pub fn is_done(&self) -> bool {
        self.step == InitStep::Done
    }
}

impl Default for InitSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// spec §4.5 "Endpoint reset": Reset-Endpoint, then Set-TR-Dequeue to
/// skip the offending TRB. `Clear-TT-Buffer` (on a hub-attached LS/FS
/// device) is issued by the hub driver directly against the parent hub,
/// not modeled here.
pub fn endpoint_reset_trbs(
    slot_id: u8,
    endpoint_id: u8,
    new_dequeue_ptr: u64,
    dequeue_cycle_state: bool,
) -> (Trb, Trb) {
    let reset = build_reset_endpoint_trb(slot_id, endpoint_id);
    let set_dequeue =
        build_set_tr_dequeue_pointer_trb(slot_id, endpoint_id, new_dequeue_ptr, dequeue_cycle_state);
    (reset, set_dequeue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_string_appends_into_next_free_tier() {
        let root = append_route_tier(0, 3).unwrap();
        assert_eq!(root, 0x3);
        let second = append_route_tier(root, 1).unwrap();
        assert_eq!(second, 0x13);
    }

    #[test]
    fn route_string_rejects_a_sixth_tier() {
        let mut route = 0u32;
        for port in 1..=MAX_ROUTE_TIERS as u8 {
            route = append_route_tier(route, port).unwrap();
        }
        assert_eq!(append_route_tier(route, 1), Err(RouteError::TooManyTiers));
    }

    #[test]
    fn route_string_rejects_port_above_4_bits() {
        assert_eq!(append_route_tier(0, 16), Err(RouteError::PortOutOfRange));
    }

    #[test]
    fn endpoint_context_packs_dcs_into_low_bit() {
        let ep = EndpointContextFields {
            max_packet_size: 512,
            endpoint_type: EndpointType::Bulk,
            interval: 0,
            ring_dequeue_ptr: 0x1000,
            dequeue_cycle_state: true,
        };
        assert_eq!(ep.packed_dequeue_pointer(), 0x1001);
    }

    #[test]
    fn init_sequence_walks_all_five_steps_in_order() {
        let mut seq = InitSequence::new();
        assert_eq!(seq.step(), InitStep::EnableSlot);

        seq.on_slot_enabled(1);
        assert_eq!(seq.step(), InitStep::AddressDeviceBsr);
        assert_eq!(seq.slot_id(), Some(1));

        seq.address_device_bsr_trb(0x2000).unwrap();
        seq.on_address_device_bsr_done();
        assert_eq!(seq.step(), InitStep::FetchFirst8Bytes);

        seq.on_first_8_bytes_fetched();
        assert_eq!(seq.step(), InitStep::EvaluateContextMaxPacketSize);

        seq.evaluate_context_trb(0x2000).unwrap();
        seq.on_max_packet_size_evaluated();
        assert_eq!(seq.step(), InitStep::FetchFullDescriptors);

        seq.on_full_descriptors_fetched();
        assert_eq!(seq.step(), InitStep::ConfigureEndpoints);

        seq.configure_endpoints_trb(0x2000).unwrap();
        seq.on_endpoints_configured();
        assert!(seq.is_done());
    }

    #[test]
    fn commands_before_slot_enabled_fail() {
        let seq = InitSequence::new();
        assert_eq!(seq.address_device_bsr_trb(0x1000), Err(InitError::CommandFailed));
    }
}
