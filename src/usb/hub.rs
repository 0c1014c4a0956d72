//! USB hub protocol (spec §4.6 "Hub port power-up and reset
//! sequence", "Port status-change polling").
//!
//! Grounded on `original_source/lib/usb/usbstandardhub.cpp`'s
//! `CUSBStandardHub::EnumeratePorts`/`PowerOn` device loop: each port is
//! powered, waits for the power-good delay, then runs the per-port
//! reset state machine before the device behind it can be addressed.
//! The port/hub status-word layout and feature selectors are standard
//! USB 2.0 chapter 11 values, not this crate's invention.

use crate::usb::core::UsbSpeed;

/// `wPortStatus` bits (USB 2.0 §11.24.2.7).
pub mod status_bits {
    pub const CONNECTION: u16 = 1 << 0;
    pub const ENABLE: u16 = 1 << 1;
    pub const SUSPEND: u16 = 1 << 2;
    pub const OVER_CURRENT: u16 = 1 << 3;
    pub const RESET: u16 = 1 << 4;
    pub const POWER: u16 = 1 << 8;
    pub const LOW_SPEED: u16 = 1 << 9;
    pub const HIGH_SPEED: u16 = 1 << 10;
    pub const TEST: u16 = 1 << 11;
    pub const INDICATOR: u16 = 1 << 12;
}

/// `wPortChange` bits (USB 2.0 §11.24.2.8).
pub mod change_bits {
    pub const C_CONNECTION: u16 = 1 << 0;
    pub const C_ENABLE: u16 = 1 << 1;
    pub const C_SUSPEND: u16 = 1 << 2;
    pub const C_OVER_CURRENT: u16 = 1 << 3;
    pub const C_RESET: u16 = 1 << 4;
}

/// Port feature selectors for `SET_FEATURE`/`CLEAR_FEATURE` (USB 2.0
/// table 11-17).
pub mod feature {
    pub const PORT_CONNECTION: u16 = 0;
    pub const PORT_ENABLE: u16 = 1;
    pub const PORT_SUSPEND: u16 = 2;
    pub const PORT_OVER_CURRENT: u16 = 3;
    pub const PORT_RESET: u16 = 4;
    pub const PORT_POWER: u16 = 8;
    pub const PORT_LOW_SPEED: u16 = 9;
    pub const C_PORT_CONNECTION: u16 = 16;
    pub const C_PORT_ENABLE: u16 = 17;
    pub const C_PORT_SUSPEND: u16 = 18;
    pub const C_PORT_OVER_CURRENT: u16 = 19;
    pub const C_PORT_RESET: u16 = 20;
}

/// Maximum number of reset attempts before a port is given up on
/// (`usbstandardhub.cpp` retries a failed reset a small, bounded number
/// of times rather than forever).
pub const MAX_RESET_RETRIES: u8 = 3;

/// spec §4.6: "the hub's wPortStatus LOW_SPEED/HIGH_SPEED bits give the
/// speed of the device now attached; if neither is set, it is full
/// speed."
pub fn speed_from_port_status(port_status: u16) -> UsbSpeed {
    if port_status & status_bits::LOW_SPEED != 0 {
        UsbSpeed::Low
    } else if port_status & status_bits::HIGH_SPEED != 0 {
        UsbSpeed::High
    } else {
        UsbSpeed::Full
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStep {
    PowerOn,
    WaitPowerGood,
    WaitConnection,
    Reset,
    WaitResetComplete,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    OverCurrent,
    ResetTimedOut,
    NoDeviceConnected,
}

/// One request the caller should issue against the hub's control
/// endpoint next (`SET_FEATURE`/`CLEAR_FEATURE`/`GET_PORT_STATUS` per
/// USB 2.0 §11.24.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRequest {
    SetFeature(u16),
    ClearFeature(u16),
    GetStatus,
    None,
}

/// Drives one hub port through power-up, connection detection, and
/// reset (spec §4.6), one request/response pair at a time so it can be
/// stepped by a fake hub in tests.
pub struct PortInitSequence {
    step: PortStep,
    reset_attempts: u8,
    speed: Option<UsbSpeed>,
}

impl PortInitSequence {
    pub fn new() -> Self {
        Self {
            step: PortStep::PowerOn,
            reset_attempts: 0,
            speed: None,
        }
    }

    pub fn step(&self) -> PortStep {
        self.step
    }

    pub fn speed(&self) -> Option<UsbSpeed> {
        self.speed
    }

    /// What to send the hub next, given the current step.
    pub fn next_request(&self) -> PortRequest {
        match self.step {
            PortStep::PowerOn => PortRequest::SetFeature(feature::PORT_POWER),
            PortStep::WaitPowerGood | PortStep::WaitConnection | PortStep::WaitResetComplete => {
                PortRequest::GetStatus
            }
            PortStep::Reset => PortRequest::SetFeature(feature::PORT_RESET),
            PortStep::Done | PortStep::Error => PortRequest::None,
        }
    }

    /// Call after `SetFeature(PORT_POWER)` completes.
    pub fn on_powered(&mut self) {
        self.step = PortStep::WaitPowerGood;
    }

    /// Call with each `GET_PORT_STATUS` poll result while waiting for
    /// the power-good delay to elapse and a device to connect.
    pub fn on_status_poll(
        &mut self,
        port_status: u16,
        port_change: u16,
    ) -> Result<(), PortError> {
        if port_status & status_bits::OVER_CURRENT != 0 {
            self.step = PortStep::Error;
            return Err(PortError::OverCurrent);
        }

        match self.step {
            PortStep::WaitPowerGood => {
                if port_status & status_bits::POWER != 0 {
                    self.step = PortStep::WaitConnection;
                }
                Ok(())
            }
            PortStep::WaitConnection => {
                if port_change & change_bits::C_CONNECTION != 0 && port_status & status_bits::CONNECTION != 0 {
                    self.step = PortStep::Reset;
                }
                Ok(())
            }
            PortStep::WaitResetComplete => {
                if port_change & change_bits::C_RESET != 0 {
                    if port_status & status_bits::ENABLE != 0 {
                        self.speed = Some(speed_from_port_status(port_status));
                        self.step = PortStep::Done;
                        Ok(())
                    } else {
                        self.retry_reset()
                    }
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Call after `SetFeature(PORT_RESET)` completes.
    pub fn on_reset_issued(&mut self) {
        self.step = PortStep::WaitResetComplete;
    }

    fn retry_reset(&mut self) -> Result<(), PortError> {
        self.reset_attempts += 1;
        if self.reset_attempts >= MAX_RESET_RETRIES {
            self.step = PortStep::Error;
            return Err(PortError::ResetTimedOut);
        }
        self.step = PortStep::Reset;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.step == PortStep::Done
    }
}

impl Default for PortInitSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_walks_power_connect_reset_to_done() {
        let mut p = PortInitSequence::new();
        assert_eq!(p.next_request(), PortRequest::SetFeature(feature::PORT_POWER));
        p.on_powered();

        p.on_status_poll(status_bits::POWER, 0).unwrap();
        assert_eq!(p.step(), PortStep::WaitConnection);

        p.on_status_poll(status_bits::POWER | status_bits::CONNECTION, change_bits::C_CONNECTION)
            .unwrap();
        assert_eq!(p.step(), PortStep::Reset);

        p.on_reset_issued();
        p.on_status_poll(
            status_bits::POWER | status_bits::CONNECTION | status_bits::ENABLE | status_bits::HIGH_SPEED,
            change_bits::C_RESET,
        )
        .unwrap();
        assert!(p.is_done());
        assert_eq!(p.speed(), Some(UsbSpeed::High));
    }

    #[test]
    fn over_current_aborts_immediately() {
        let mut p = PortInitSequence::new();
        p.on_powered();
        let result = p.on_status_poll(status_bits::OVER_CURRENT, 0);
        assert_eq!(result, Err(PortError::OverCurrent));
        assert_eq!(p.step(), PortStep::Error);
    }

    #[test]
    fn reset_without_enable_retries_up_to_the_limit() {
        let mut p = PortInitSequence::new();
        p.on_powered();
        p.on_status_poll(status_bits::POWER, 0).unwrap();
        p.on_status_poll(status_bits::POWER | status_bits::CONNECTION, change_bits::C_CONNECTION)
            .unwrap();
        p.on_reset_issued();

        for _ in 0..MAX_RESET_RETRIES - 1 {
            p.on_status_poll(status_bits::POWER | status_bits::CONNECTION, change_bits::C_RESET)
                .unwrap();
            assert_eq!(p.step(), PortStep::Reset);
            p.on_reset_issued();
        }

        let result = p.on_status_poll(status_bits::POWER | status_bits::CONNECTION, change_bits::C_RESET);
        assert_eq!(result, Err(PortError::ResetTimedOut));
    }

    #[test]
    fn low_speed_bit_reports_low_speed() {
        assert_eq!(
            speed_from_port_status(status_bits::LOW_SPEED),
            UsbSpeed::Low
        );
        assert_eq!(speed_from_port_status(0), UsbSpeed::Full);
    }
}
