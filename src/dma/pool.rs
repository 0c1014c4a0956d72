//! DMA channel pool: "allocate/free numbered channels from a
//! machine-specific mask" (spec §2).
//!
//! The real hardware wires specific channel numbers to "Lite" (smaller
//! transfer-length cap, no 2-D mode) or "Extended" (40-bit address)
//! variants; the pool is seeded with that mapping once at startup and
//! hands out channel numbers by atomic bitmask update, the way the
//! original's `CMachineInfo::AllocateDMAChannel` walks a free mask
//! under a lock rather than a full allocator.

use core::sync::atomic::{AtomicU32, Ordering};

/// Total number of legacy DMA channels the controller exposes.
pub const DMA_CHANNEL_COUNT: u32 = 16;

/// The channel class requested at construction time (spec §4.2:
/// "Constructor takes either an explicit channel number or one of three
/// classes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Normal,
    Lite,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No free channel in the requested class.
    Exhausted,
    /// An explicit channel number was out of range or already taken.
    AlreadyAllocated,
    OutOfRange,
}

/// Per-channel class assignment and the live allocation bitmask.
pub struct ChannelPool {
    /// Bit `n` set means channel `n` is a Lite channel.
    lite_mask: u32,
    /// Bit `n` set means channel `n` is an Extended (40-bit) channel.
    extended_mask: u32,
    /// Bit `n` set means channel `n` is currently allocated.
    allocated: AtomicU32,
}

impl ChannelPool {
    /// Construct a pool for a board where `lite_mask` and
    /// `extended_mask` identify which channel numbers are wired to
    /// which hardware variant (the two masks must be disjoint; every
    /// other channel is `Normal`).
    pub const fn new(lite_mask: u32, extended_mask: u32) -> Self {
        Self {
            lite_mask,
            extended_mask,
            allocated: AtomicU32::new(0),
        }
    }

    fn class_of(&self, channel: u32) -> ChannelClass {
        let bit = 1u32 << channel;
        if self.extended_mask & bit != 0 {
            ChannelClass::Extended
        } else if self.lite_mask & bit != 0 {
            ChannelClass::Lite
        } else {
            ChannelClass::Normal
        }
    }

    fn try_claim(&self, channel: u32) -> Result<(), PoolError> {
        let bit = 1u32 << channel;
        let prev = self.allocated.fetch_or(bit, Ordering::AcqRel);
        if prev & bit != 0 {
            Err(PoolError::AlreadyAllocated)
        } else {
            Ok(())
        }
    }

    /// Allocate a specific channel number.
    pub fn allocate_explicit(&self, channel: u32) -> Result<u32, PoolError> {
        if channel >= DMA_CHANNEL_COUNT {
            return Err(PoolError::OutOfRange);
        }
        self.try_claim(channel)?;
        Ok(channel)
    }

    /// Allocate any free channel matching `class`.
    pub fn allocate(&self, class: ChannelClass) -> Result<u32, PoolError> {
        for channel in 0..DMA_CHANNEL_COUNT {
            if self.class_of(channel) != class {
                continue;
            }
            if self.try_claim(channel).is_ok() {
                return Ok(channel);
            }
        }
        Err(PoolError::Exhausted)
    }

    /// Return `channel` to the pool.
    pub fn free(&self, channel: u32) {
        let bit = 1u32 << channel;
        self.allocated.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn is_allocated(&self, channel: u32) -> bool {
        self.allocated.load(Ordering::Acquire) & (1u32 << channel) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_from_requested_class() {
        let pool = ChannelPool::new(0b0000_0000_0000_0111, 0b0000_0000_0000_1000);
        let lite = pool.allocate(ChannelClass::Lite).unwrap();
        assert!(lite < 3);
        let ext = pool.allocate(ChannelClass::Extended).unwrap();
        assert_eq!(ext, 3);
    }

    #[test]
    fn exhausted_class_fails() {
        let pool = ChannelPool::new(0b1, 0);
        pool.allocate(ChannelClass::Lite).unwrap();
        assert_eq!(pool.allocate(ChannelClass::Lite), Err(PoolError::Exhausted));
    }

    #[test]
    fn double_allocate_explicit_fails() {
        let pool = ChannelPool::new(0, 0);
        pool.allocate_explicit(5).unwrap();
        assert_eq!(
            pool.allocate_explicit(5),
            Err(PoolError::AlreadyAllocated)
        );
    }

    #[test]
    fn free_allows_reallocation() {
        let pool = ChannelPool::new(0, 0);
        let ch = pool.allocate_explicit(2).unwrap();
        pool.free(ch);
        assert!(pool.allocate_explicit(2).is_ok());
    }
}
