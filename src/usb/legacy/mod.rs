//! The legacy (DWC2-style) split-transfer host controller engine
//! (spec §4.4).

pub mod host;
pub mod scheduler;
pub mod stage;

pub use host::{ChannelEngine, EngineAction, EngineError, HcChannelPool, Retirement, MAX_CHANNELS};
pub use scheduler::{FrameScheduler, SchedulerKind};
pub use stage::{Outcome, StageData};
