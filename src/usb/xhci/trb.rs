//! xHCI Transfer Request Block layout (spec §3 "xHCI ring": "A
//! page-aligned, cache-coherent contiguous array of 16-byte TRBs").
//!
//! Grounded on the TRB field layout implied by
//! `original_source/lib/usb/xhcidevice.cpp`/`xhciendpoint.cpp`'s use of
//! `TXHCITRB` (parameter/status/control words) and on the xHCI 1.1
//! specification's TRB type and completion-code numbering, which the
//! retrieved sources reference by name (`XHCI_TRB_TYPE_NORMAL`, ...)
//! but whose header was not retrieved; the numeric values here are the
//! spec-defined constants those names resolve to.

use zerocopy::{Immutable, IntoBytes};

/// A single 16-byte TRB: a 64-bit parameter, a 32-bit status word, and
/// a 32-bit control word whose bit 0 is the cycle bit.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

const _: () = assert!(core::mem::size_of::<Trb>() == 16);

pub mod control_bits {
    pub const CYCLE: u32 = 1 << 0;
    pub const TOGGLE_CYCLE: u32 = 1 << 1;
    pub const ENT: u32 = 1 << 1; // Evaluate Next TRB (transfer TRBs)
    pub const ISP: u32 = 1 << 2;
    pub const IOC: u32 = 1 << 5;
    pub const IDT: u32 = 1 << 6; // Immediate Data (setup stage)
    pub const TYPE_SHIFT: u32 = 10;
    pub const TYPE_MASK: u32 = 0x3F << TYPE_SHIFT;
    pub const DIR_IN: u32 = 1 << 16; // Data/Status stage direction bit
    pub const SIA: u32 = 1 << 31; // Schedule in any available (isoch)

    /// Transfer-type field of a SETUP_STAGE TRB (control.bits 16:17).
    pub const TRT_NO_DATA: u32 = 0 << 16;
    pub const TRT_OUT: u32 = 2 << 16;
    pub const TRT_IN: u32 = 3 << 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrbType {
    Normal = 1,
    SetupStage = 2,
    DataStage = 3,
    StatusStage = 4,
    Isoch = 5,
    Link = 6,
    EnableSlotCommand = 9,
    DisableSlotCommand = 10,
    AddressDeviceCommand = 11,
    ConfigureEndpointCommand = 12,
    EvaluateContextCommand = 13,
    ResetEndpointCommand = 14,
    StopEndpointCommand = 15,
    SetTrDequeuePointerCommand = 16,
    ResetDeviceCommand = 17,
    NoopCommand = 23,
    TransferEvent = 32,
    CommandCompletionEvent = 33,
    PortStatusChangeEvent = 34,
}

impl TrbType {
    pub fn control_bits(self) -> u32 {
        (self as u32) << control_bits::TYPE_SHIFT
    }
}

/// `CompletionCode` from a TRB's status word, bits 24..31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Success,
    DataBufferError,
    BabbleDetectedError,
    UsbTransactionError,
    TrbError,
    StallError,
    ResourceError,
    BandwidthError,
    NoSlotsAvailableError,
    ShortPacket,
    Other(u8),
}

impl CompletionCode {
    pub fn from_bits(code: u8) -> Self {
        match code {
            1 => CompletionCode::Success,
            2 => CompletionCode::DataBufferError,
            3 => CompletionCode::BabbleDetectedError,
            4 => CompletionCode::UsbTransactionError,
            5 => CompletionCode::TrbError,
            6 => CompletionCode::StallError,
            7 => CompletionCode::ResourceError,
            8 => CompletionCode::BandwidthError,
            9 => CompletionCode::NoSlotsAvailableError,
            13 => CompletionCode::ShortPacket,
            other => CompletionCode::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, CompletionCode::Success | CompletionCode::ShortPacket)
    }
}

impl Trb {
    pub const fn zeroed() -> Self {
        Self {
            parameter: 0,
            status: 0,
            control: 0,
        }
    }

    pub fn trb_type_bits(&self) -> u32 {
        (self.control & control_bits::TYPE_MASK) >> control_bits::TYPE_SHIFT
    }

    pub fn cycle_bit(&self) -> bool {
        self.control & control_bits::CYCLE != 0
    }

    pub fn completion_code(&self) -> CompletionCode {
        CompletionCode::from_bits(((self.status >> 24) & 0xFF) as u8)
    }

    /// Slot ID an event TRB refers to (control bits 24:31 for most
    /// event types).
    pub fn slot_id(&self) -> u8 {
        ((self.control >> 24) & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trb_is_16_bytes() {
        assert_eq!(core::mem::size_of::<Trb>(), 16);
    }

    #[test]
    fn completion_code_decodes_success_and_short_packet_as_success() {
        assert!(CompletionCode::from_bits(1).is_success());
        assert!(CompletionCode::from_bits(13).is_success());
        assert!(!CompletionCode::from_bits(6).is_success());
    }

    #[test]
    fn trb_type_bits_roundtrip_through_control_word() {
        let mut trb = Trb::zeroed();
        trb.control = TrbType::Link.control_bits();
        assert_eq!(trb.trb_type_bits(), TrbType::Link as u32);
    }
}
