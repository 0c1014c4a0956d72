//! The USB host stack (spec §4.4-§4.7): shared request/endpoint/device
//! objects, the legacy split-transfer engine, the xHCI ring/event/
//! command/slot manager, hub protocol, device enumeration, and the
//! mass-storage command set.

pub mod core;
pub mod enumeration;
pub mod hub;
pub mod legacy;
pub mod mass_storage;
pub mod xhci;

pub use core::{Device, Direction, Endpoint, EndpointType, Pid, SetupData, UsbError, UsbSpeed, Urb};
