//! Memory services: the coherent, DMA-visible shared-memory allocator.

pub mod coherent;

pub use coherent::{CoherentAllocator, CoherentError};
