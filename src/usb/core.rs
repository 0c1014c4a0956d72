//! USB request/endpoint/device objects shared by both host controllers
//! (spec §3 "USB device"/"USB endpoint"/"USB request (URB)").
//!
//! Grounded on `CUSBDevice`/`CUSBEndpoint`/`CUSBRequest`'s field sets in
//! `original_source/lib/usb/usbdevice.cpp` and on the EHCI driver's
//! `UsbSpeed`/`UsbError`/`EndpointType`/`Direction` naming (the only
//! USB-enum vocabulary already present in this crate).

use core::sync::atomic::{AtomicU8, Ordering};

pub const MAX_ISO_SPLIT_PAYLOAD: usize = 188;
pub const MAX_BULK_RETRIES: u32 = 8;
pub const MAX_FUNCTIONS_PER_DEVICE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UsbSpeed {
    Low,
    Full,
    High,
    Super,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

impl EndpointType {
    pub fn is_periodic(self) -> bool {
        matches!(self, EndpointType::Interrupt | EndpointType::Isochronous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    Setup,
    Data0,
    Data1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    Stall,
    Transaction,
    Babble,
    FrameOverrun,
    DataToggle,
    HostBus,
    Timeout,
    Unknown,
}

/// `TSetupData`: the 8-byte control-transfer setup packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct SetupData {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_CONFIGURATION: u8 = 0x09;
}

pub mod req_type {
    pub const OUT: u8 = 0x00;
    pub const IN: u8 = 0x80;
    pub const STANDARD: u8 = 0x00;
    pub const CLASS: u8 = 0x20;
    pub const DEVICE: u8 = 0x00;
    pub const INTERFACE: u8 = 0x01;
    pub const ENDPOINT: u8 = 0x02;
}

/// A single USB endpoint (spec §3 "USB endpoint"). The PID toggle is
/// owned here, not by the transfer engine, since SETUP transactions and
/// retries both need to consult and occasionally reset it.
pub struct Endpoint {
    number: u8,
    direction: Direction,
    transfer_type: EndpointType,
    max_packet_size: u16,
    interval: u32,
    toggle: AtomicU8, // 0 = DATA0, 1 = DATA1
}

impl Endpoint {
    pub fn new(number: u8, direction: Direction, transfer_type: EndpointType, max_packet_size: u16, interval: u32) -> Self {
        Self {
            number,
            direction,
            transfer_type,
            max_packet_size,
            interval,
            toggle: AtomicU8::new(0),
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn transfer_type(&self) -> EndpointType {
        self.transfer_type
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn set_max_packet_size(&mut self, size: u16) {
        self.max_packet_size = size;
    }

    pub fn reset_toggle(&self) {
        self.toggle.store(0, Ordering::Relaxed);
    }

    /// `GetNextPID`: SETUP for a control endpoint's first stage,
    /// otherwise whichever of DATA0/DATA1 the toggle currently holds.
    pub fn next_pid(&self, is_status_stage: bool) -> Pid {
        if self.transfer_type == EndpointType::Control && !is_status_stage && self.toggle.load(Ordering::Relaxed) == 0 {
            return Pid::Setup;
        }
        if self.toggle.load(Ordering::Relaxed) == 0 {
            Pid::Data0
        } else {
            Pid::Data1
        }
    }

    /// `SkipPID(count)`: advance the toggle by `count` packets (an odd
    /// count flips it, an even count leaves it where it was).
    pub fn skip_pid(&self, packets: u32) {
        if packets % 2 == 1 {
            self.toggle.fetch_xor(1, Ordering::Relaxed);
        }
    }

    /// A SETUP stage always leaves the following DATA/STATUS stage at
    /// DATA1.
    pub fn set_toggle_after_setup(&self) {
        self.toggle.store(1, Ordering::Relaxed);
    }

    /// bInterval converted to (micro)frames per the speed-specific
    /// rules: 1..16 as a direct (micro)frame count below full speed,
    /// `2^(bInterval-1)` microframes at high speed.
    pub fn interval_from_binterval(speed: UsbSpeed, transfer_type: EndpointType, b_interval: u8) -> u32 {
        match (speed, transfer_type) {
            (UsbSpeed::High, EndpointType::Interrupt | EndpointType::Isochronous) => {
                1u32 << (b_interval.saturating_sub(1).min(15))
            }
            _ => b_interval.max(1) as u32,
        }
    }
}

/// A USB device (spec §3 "USB device").
pub struct Device {
    address: u8,
    speed: UsbSpeed,
    is_split: bool,
    hub_address: u8,
    hub_port_number: u8,
}

impl Device {
    pub fn new(speed: UsbSpeed, hub_address: u8, hub_port_number: u8) -> Self {
        let is_split = speed != UsbSpeed::High && hub_address != 0;
        Self {
            address: 0,
            speed,
            is_split,
            hub_address,
            hub_port_number,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn is_initialized(&self) -> bool {
        self.address != 0
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    pub fn is_split(&self) -> bool {
        self.is_split
    }

    pub fn hub_address(&self) -> u8 {
        self.hub_address
    }

    pub fn hub_port_number(&self) -> u8 {
        self.hub_port_number
    }
}

/// A USB request / URB (spec §3 "USB request (URB)").
pub struct Urb<'a> {
    pub buffer: &'a mut [u8],
    pub setup: Option<SetupData>,
    pub iso_packet_sizes: &'a [u16],
    pub result_len: usize,
    pub status: bool,
    pub usb_error: Option<UsbError>,
    pub complete_on_nak: bool,
}

impl<'a> Urb<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            setup: None,
            iso_packet_sizes: &[],
            result_len: 0,
            status: false,
            usb_error: None,
            complete_on_nak: false,
        }
    }

    pub fn num_iso_packets(&self) -> usize {
        self.iso_packet_sizes.len()
    }

    pub fn iso_packet_size(&self, index: usize) -> usize {
        self.iso_packet_sizes[index] as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_pid_resets_to_data1_after_setup_stage() {
        let ep = Endpoint::new(0, Direction::Out, EndpointType::Control, 64, 0);
        assert_eq!(ep.next_pid(false), Pid::Setup);
        ep.set_toggle_after_setup();
        assert_eq!(ep.next_pid(false), Pid::Data1);
    }

    #[test]
    fn skip_pid_flips_toggle_on_odd_packet_counts() {
        let ep = Endpoint::new(1, Direction::In, EndpointType::Bulk, 512, 0);
        assert_eq!(ep.next_pid(false), Pid::Data0);
        ep.skip_pid(1);
        assert_eq!(ep.next_pid(false), Pid::Data1);
        ep.skip_pid(2);
        assert_eq!(ep.next_pid(false), Pid::Data1);
        ep.skip_pid(1);
        assert_eq!(ep.next_pid(false), Pid::Data0);
    }

    #[test]
    fn high_speed_periodic_interval_is_power_of_two_microframes() {
        assert_eq!(
            Endpoint::interval_from_binterval(UsbSpeed::High, EndpointType::Interrupt, 1),
            1
        );
        assert_eq!(
            Endpoint::interval_from_binterval(UsbSpeed::High, EndpointType::Interrupt, 4),
            8
        );
    }

    #[test]
    fn full_speed_interval_is_direct_frame_count() {
        assert_eq!(
            Endpoint::interval_from_binterval(UsbSpeed::Full, EndpointType::Interrupt, 10),
            10
        );
    }

    #[test]
    fn device_is_split_only_below_high_speed_behind_a_hub() {
        let hs = Device::new(UsbSpeed::High, 1, 2);
        assert!(!hs.is_split());
        let fs_behind_hub = Device::new(UsbSpeed::Full, 1, 2);
        assert!(fs_behind_hub.is_split());
        let fs_root = Device::new(UsbSpeed::Full, 0, 0);
        assert!(!fs_root.is_split());
    }
}
