//! Sound output pipeline (spec §4.3): sample format conversion, the
//! producer/consumer [`Queue`], the back-end state machine shared by
//! both peripherals, and the PWM/I²S back ends themselves.

pub mod device;
pub mod format;
pub mod i2s;
pub mod pwm;
pub mod queue;

pub use device::{BaseDevice, ChunkProvider, QueueProvider, State};
pub use format::{HwFormat, SampleFormat};
pub use i2s::{I2sSoundDevice, I2sSoundError};
pub use pwm::{PwmSoundDevice, PwmSoundError};
pub use queue::{Queue, QueueError};
