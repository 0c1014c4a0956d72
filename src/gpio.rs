//! GPIO pin mux/pull and the clock-manager dividers the sound back
//! ends use for their peripheral clocks (spec §2: "GPIO/Clock ... Pin
//! mux, pull, pin clock dividers").
//!
//! Grounded on the PWM/I²S sound back ends' construction sequence
//! (`m_Audio1 (GPIOPinAudioLeft, GPIOModeAlternateFunction0)`, `m_Clock
//! (GPIOClockPWM)`, `m_Clock.StartRate (CLOCK_RATE)`), which is the
//! only place in the retrieved sources this leaf dependency is driven
//! from.

use crate::arch::layout::PERIPHERAL_BASE;
use crate::arch::mmio::{self, read32, write32};
use crate::time::Timeout;

const GPIO_BASE: usize = PERIPHERAL_BASE + 0x0020_0000;
const GPFSEL0: usize = GPIO_BASE + 0x00;
const GPPUD: usize = GPIO_BASE + 0x94;
const GPPUDCLK0: usize = GPIO_BASE + 0x98;

const CM_BASE: usize = PERIPHERAL_BASE + 0x0010_1000;
const CM_PASSWORD: u32 = 0x5A00_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl Mode {
    fn fsel_bits(self) -> u32 {
        match self {
            Mode::Input => 0b000,
            Mode::Output => 0b001,
            Mode::Alt0 => 0b100,
            Mode::Alt1 => 0b101,
            Mode::Alt2 => 0b110,
            Mode::Alt3 => 0b111,
            Mode::Alt4 => 0b011,
            Mode::Alt5 => 0b010,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

impl Pull {
    fn bits(self) -> u32 {
        match self {
            Pull::Off => 0b00,
            Pull::Down => 0b01,
            Pull::Up => 0b10,
        }
    }
}

/// A single GPIO pin, set to a fixed alternate function or direction
/// for the lifetime of the owning driver (sound back ends hold one per
/// audio output line).
pub struct Pin {
    number: u32,
}

impl Pin {
    pub fn new(number: u32, mode: Mode) -> Self {
        let pin = Self { number };
        pin.set_mode(mode);
        pin
    }

    pub fn set_mode(&self, mode: Mode) {
        let reg = GPFSEL0 + (self.number as usize / 10) * 4;
        let shift = (self.number % 10) * 3;
        mmio::peripheral_entry();
        unsafe {
            let mask = 0b111u32 << shift;
            let current = read32(reg);
            write32(reg, (current & !mask) | (mode.fsel_bits() << shift));
        }
        mmio::peripheral_exit();
    }

    /// Program the pull up/down/off state, following the documented
    /// two-clock-cycle GPPUD/GPPUDCLK sequence.
    pub fn set_pull(&self, pull: Pull) {
        mmio::peripheral_entry();
        unsafe {
            write32(GPPUD, pull.bits());
            delay_cycles(150);
            write32(GPPUDCLK0 + (self.number as usize / 32) * 4, 1 << (self.number % 32));
            delay_cycles(150);
            write32(GPPUD, 0);
            write32(GPPUDCLK0 + (self.number as usize / 32) * 4, 0);
        }
        mmio::peripheral_exit();
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

fn delay_cycles(n: u32) {
    for _ in 0..n {
        core::hint::spin_loop();
    }
}

/// Which clock-manager generator a peripheral clock lives at
/// (`GPIOClockPWM`/`GPIOClockPCM` in the source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockGenerator {
    Pwm,
    Pcm,
}

impl ClockGenerator {
    fn ctl_offset(self) -> usize {
        match self {
            ClockGenerator::Pwm => 0xA0,
            ClockGenerator::Pcm => 0x98,
        }
    }

    fn div_offset(self) -> usize {
        self.ctl_offset() + 0x04
    }
}

/// A peripheral clock generator: selects an oscillator source and a
/// fractional divider to reach the requested output rate.
pub struct Clock {
    generator: ClockGenerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The requested rate cannot be reached with a source this crate
    /// knows how to select.
    RateUnreachable,
    /// The generator did not report "not busy" within the timeout.
    Busy,
}

/// The crystal oscillator frequency used as the clock source, in Hz.
const OSCILLATOR_HZ: u32 = 19_200_000;

impl Clock {
    pub const fn new(generator: ClockGenerator) -> Self {
        Self { generator }
    }

    /// Start the generator at `rate_hz`, selecting the oscillator
    /// source and an integer divider (`CLOCK_RATE` in the sound back
    /// ends is always a multiple the oscillator divides evenly enough
    /// for audio rates; fractional remainder is dropped, matching the
    /// source's plain integer-divider programming).
    pub fn start_rate(&self, rate_hz: u32) -> Result<(), ClockError> {
        if rate_hz == 0 {
            return Err(ClockError::RateUnreachable);
        }
        let divi = (OSCILLATOR_HZ / rate_hz).max(1).min(0xFFF);

        let ctl = CM_BASE + self.generator.ctl_offset();
        let div = CM_BASE + self.generator.div_offset();

        mmio::peripheral_entry();
        unsafe {
            write32(ctl, CM_PASSWORD | 0); // kill the clock first
            let timeout = Timeout::from_ms(20);
            while read32(ctl) & (1 << 7) != 0 {
                // BUSY
                if timeout.is_expired() {
                    mmio::peripheral_exit();
                    return Err(ClockError::Busy);
                }
            }
            write32(div, CM_PASSWORD | (divi << 12));
            write32(ctl, CM_PASSWORD | 0x1 /* SRC=oscillator */ | (1 << 4) /* ENAB */);
        }
        mmio::peripheral_exit();
        Ok(())
    }

    pub fn stop(&self) {
        let ctl = CM_BASE + self.generator.ctl_offset();
        mmio::peripheral_entry();
        unsafe { write32(ctl, CM_PASSWORD) };
        mmio::peripheral_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_match_bcm_fsel_encoding() {
        assert_eq!(Mode::Input.fsel_bits(), 0b000);
        assert_eq!(Mode::Output.fsel_bits(), 0b001);
        assert_eq!(Mode::Alt0.fsel_bits(), 0b100);
        assert_eq!(Mode::Alt5.fsel_bits(), 0b010);
    }

    #[test]
    fn pull_bits_match_bcm_encoding() {
        assert_eq!(Pull::Off.bits(), 0b00);
        assert_eq!(Pull::Down.bits(), 0b01);
        assert_eq!(Pull::Up.bits(), 0b10);
    }
}
