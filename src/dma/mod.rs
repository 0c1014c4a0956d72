//! The DMA engine (spec §4.2): control-block layouts, the channel
//! pool, and the channel object itself.

pub mod channel;
pub mod control_block;
pub mod pool;
pub mod regs;

pub use channel::{CompletionRoutine, DmaChannel, DmaError, Dreq, DREQ_NONE};
pub use control_block::{Cb32, Cb40};
pub use pool::{ChannelClass, ChannelPool, PoolError};
