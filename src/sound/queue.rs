//! Lock-protected producer/consumer sample queue (spec §4.3 "Queue
//! API").
//!
//! Samples are stored internally as full-range signed 32-bit values,
//! one per channel per frame, regardless of the caller's write format
//! — conversion happens once, in [`Queue::write`], so the IRQ-level
//! consumer (`get_chunk`) never does format work under the interrupt.

use alloc::vec::Vec;
use spin::Mutex;

use super::format::SampleFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// `allocate_queue`/`allocate_queue_frames` was called on a queue
    /// that already has a backing buffer.
    AlreadyAllocated,
    /// No write format has been set yet.
    NoWriteFormat,
}

pub type NeedDataCallback = fn(param: *mut ());

struct Inner {
    /// Ring of interleaved full-range samples, `channels` per frame.
    ring: Vec<i32>,
    read: usize,
    write: usize,
    len: usize,
    channels: u32,
    write_format: Option<SampleFormat>,
    need_data: Option<(NeedDataCallback, usize)>,
    need_data_armed: bool,
}

/// A producer/consumer ring of audio frames, shared between task-level
/// `write()` calls and IRQ-level `get_chunk` reads.
pub struct Queue {
    inner: Mutex<Inner>,
}

impl Queue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: Vec::new(),
                read: 0,
                write: 0,
                len: 0,
                channels: 2,
                write_format: None,
                need_data: None,
                need_data_armed: false,
            }),
        }
    }

    fn allocate_frames(&self, frames: usize, channels: u32) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if !inner.ring.is_empty() {
            return Err(QueueError::AlreadyAllocated);
        }
        inner.ring = alloc::vec![0i32; frames * channels as usize];
        inner.channels = channels;
        Ok(())
    }

    /// `allocate_queue(size_msec)` (spec §4.3).
    pub fn allocate_queue(&self, size_msec: u32, sample_rate: u32, channels: u32) -> Result<(), QueueError> {
        let frames = (size_msec as u64 * sample_rate as u64 / 1000) as usize;
        self.allocate_frames(frames.max(1), channels)
    }

    /// `allocate_queue_frames(n)` (spec §4.3).
    pub fn allocate_queue_frames(&self, frames: usize, channels: u32) -> Result<(), QueueError> {
        self.allocate_frames(frames, channels)
    }

    pub fn set_write_format(&self, format: SampleFormat, channels: u32) {
        let mut inner = self.inner.lock();
        inner.write_format = Some(format);
        inner.channels = channels;
    }

    /// `register_need_data_callback(fn, param)`: requests a single
    /// callback the next time the queue level falls below half
    /// capacity.
    pub fn register_need_data_callback(&self, callback: NeedDataCallback, param: *mut ()) {
        let mut inner = self.inner.lock();
        inner.need_data = Some((callback, param as usize));
        inner.need_data_armed = true;
    }

    /// Enqueue frames from `buffer`, converting from the write format
    /// to the internal full-range representation. Returns the number
    /// of *bytes* consumed (spec §4.3: "returns the bytes consumed (may
    /// be less than requested if the queue is full)").
    pub fn write(&self, buffer: &[u8]) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock();
        let format = inner.write_format.ok_or(QueueError::NoWriteFormat)?;
        let channels = inner.channels as usize;
        let bytes_per_frame = format.bytes_per_sample() * channels;
        if bytes_per_frame == 0 {
            return Ok(0);
        }

        let capacity = inner.ring.len();
        let mut consumed_bytes = 0usize;
        let mut offset = 0usize;

        while offset + bytes_per_frame <= buffer.len() && inner.len + channels <= capacity {
            for ch in 0..channels {
                let sample = format.decode(buffer, offset + ch * format.bytes_per_sample());
                let idx = inner.write;
                inner.ring[idx] = sample;
                inner.write = (inner.write + 1) % capacity;
            }
            inner.len += channels;
            offset += bytes_per_frame;
            consumed_bytes += bytes_per_frame;
        }
        Ok(consumed_bytes)
    }

    /// Pull up to `out.len()` frames (each `channels` samples) into
    /// `out`, returning the number of *frames* actually available. If
    /// this crosses the half-full threshold while a need-data callback
    /// is armed, fire it once.
    pub fn read_frames(&self, out: &mut [i32]) -> usize {
        let mut inner = self.inner.lock();
        let channels = inner.channels as usize;
        if channels == 0 {
            return 0;
        }
        let capacity = inner.ring.len();
        let frames_wanted = out.len() / channels;
        let frames_available = inner.len / channels;
        let frames = frames_wanted.min(frames_available);

        for frame in 0..frames {
            for ch in 0..channels {
                let idx = inner.read;
                out[frame * channels + ch] = inner.ring[idx];
                inner.read = (inner.read + 1) % capacity;
            }
        }
        inner.len -= frames * channels;

        if inner.need_data_armed && capacity > 0 && inner.len * 2 < capacity {
            inner.need_data_armed = false;
            if let Some((callback, param)) = inner.need_data {
                callback(param as *mut ());
            }
        }

        frames
    }

    pub fn frames_queued(&self) -> usize {
        let inner = self.inner.lock();
        let channels = inner.channels.max(1) as usize;
        inner.len / channels
    }

    pub fn capacity_frames(&self) -> usize {
        let inner = self.inner.lock();
        let channels = inner.channels.max(1) as usize;
        inner.ring.len() / channels
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_samples() {
        let q = Queue::new();
        q.allocate_queue_frames(16, 2).unwrap();
        q.set_write_format(SampleFormat::S16, 2);

        let mut bytes = Vec::new();
        for v in [100i16, -100, 200, -200] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let consumed = q.write(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(q.frames_queued(), 2);

        let mut out = [0i32; 4];
        let frames = q.read_frames(&mut out);
        assert_eq!(frames, 2);
        assert_eq!(out[0], (100i32) << 16);
        assert_eq!(out[1], (-100i32) << 16);
    }

    #[test]
    fn write_returns_partial_when_full() {
        let q = Queue::new();
        q.allocate_queue_frames(1, 1).unwrap();
        q.set_write_format(SampleFormat::U8, 1);

        let consumed = q.write(&[1, 2, 3]).unwrap();
        assert_eq!(consumed, 1);
    }

    #[test]
    fn need_data_callback_fires_once_below_half() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn cb(_param: *mut ()) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let q = Queue::new();
        q.allocate_queue_frames(4, 1).unwrap();
        q.set_write_format(SampleFormat::U8, 1);
        q.write(&[1, 2, 3, 4]).unwrap();
        q.register_need_data_callback(cb, core::ptr::null_mut());

        let mut out = [0i32; 1];
        q.read_frames(&mut out); // 3/4 left, still above half
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        q.read_frames(&mut out); // 2/4 left, at/below half
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        q.read_frames(&mut out); // already disarmed
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
