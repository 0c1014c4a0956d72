//! The DMA engine: one [`DmaChannel`] per hardware channel, matching
//! spec §4.2's programming operations and completion model.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch::cache;
use crate::arch::mmio::{self, bus_address, read32, write32};
use crate::config::MAX_CYCLIC_BUFFERS;
use crate::irq::InterruptController;
use crate::mem::CoherentAllocator;
use crate::time::Timeout;

use super::control_block::{ti_bits, Cb32, Cb40};
use super::pool::{ChannelClass, ChannelPool, PoolError};
use super::regs::{CHANNEL_STRIDE, ENABLE_OFFSET, INT_STATUS_OFFSET, TXFR_LEN_MAX, TXFR_LEN_MAX_LITE};

/// Data-request line selecting which peripheral paces a transfer.
pub type Dreq = u32;

pub const DREQ_NONE: Dreq = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    Pool(PoolError),
    /// Requested transfer length exceeds the channel's cap (spec §4.2:
    /// "Attempting to program a transfer whose length exceeds the
    /// channel's cap fails a precondition check").
    LengthExceedsCap,
    /// `n` in `setup_cyclic_io_write` exceeded `MaxCyclicBuffers`.
    TooManyCyclicBuffers,
    /// A cyclic or 2-D operation was requested on a channel class that
    /// does not support it (Lite has no 2-D mode).
    UnsupportedByChannelClass,
    /// `start()` was called with interrupts intended but no completion
    /// routine registered (spec §4.2: "A completion routine ... must
    /// have been registered before `start()`").
    NoCompletionRoutine,
    /// The coherent allocator could not supply a control block.
    OutOfMemory,
}

impl From<PoolError> for DmaError {
    fn from(e: PoolError) -> Self {
        DmaError::Pool(e)
    }
}

pub type CompletionRoutine = fn(channel: u32, buffer_index: u32, success: bool, param: *mut ());

enum Blocks {
    Legacy([*mut Cb32; MAX_CYCLIC_BUFFERS]),
    Extended([*mut Cb40; MAX_CYCLIC_BUFFERS]),
}

struct CompletionState {
    routine: Option<CompletionRoutine>,
    param: usize,
}

// Safety: `param` is an opaque pointer owned by whichever driver
// registered the completion routine; this module never dereferences it.
unsafe impl Send for CompletionState {}

/// One DMA channel, programmed with a single descriptor or a cyclic
/// chain and driven either by `wait()` or by an attached completion
/// interrupt.
pub struct DmaChannel<'a> {
    pool: &'a ChannelPool,
    irq: &'a InterruptController,
    allocator: &'a CoherentAllocator,
    dma_base: usize,
    channel: u32,
    class: ChannelClass,
    blocks: Blocks,
    completion: spin::Mutex<CompletionState>,
    cached_dest: spin::Mutex<Option<(usize, usize)>>,
    buffer_index: AtomicU32,
    cyclic_n: AtomicU32,
    active: AtomicBool,
}

fn length_cap(class: ChannelClass) -> u32 {
    match class {
        ChannelClass::Lite => TXFR_LEN_MAX_LITE,
        ChannelClass::Normal | ChannelClass::Extended => TXFR_LEN_MAX,
    }
}

fn reg_addr(dma_base: usize, channel: u32, offset: usize) -> usize {
    dma_base + channel as usize * CHANNEL_STRIDE + offset
}

const REG_CS: usize = 0x00;
const REG_CONBLK_AD: usize = 0x04;

impl<'a> DmaChannel<'a> {
    /// Allocate any free channel of `class`, reset it, and pre-allocate
    /// up to [`MAX_CYCLIC_BUFFERS`] control blocks (spec §4.2).
    pub fn new(
        pool: &'a ChannelPool,
        irq: &'a InterruptController,
        allocator: &'a CoherentAllocator,
        dma_base: usize,
        class: ChannelClass,
    ) -> Result<Self, DmaError> {
        let channel = pool.allocate(class)?;
        Self::from_channel(pool, irq, allocator, dma_base, channel, class)
    }

    /// Allocate an explicit channel number.
    pub fn new_explicit(
        pool: &'a ChannelPool,
        irq: &'a InterruptController,
        allocator: &'a CoherentAllocator,
        dma_base: usize,
        channel: u32,
        class: ChannelClass,
    ) -> Result<Self, DmaError> {
        pool.allocate_explicit(channel)?;
        Self::from_channel(pool, irq, allocator, dma_base, channel, class)
    }

    fn from_channel(
        pool: &'a ChannelPool,
        irq: &'a InterruptController,
        allocator: &'a CoherentAllocator,
        dma_base: usize,
        channel: u32,
        class: ChannelClass,
    ) -> Result<Self, DmaError> {
        let blocks = if class == ChannelClass::Extended {
            let mut ptrs = [core::ptr::null_mut(); MAX_CYCLIC_BUFFERS];
            for slot in ptrs.iter_mut() {
                let raw = allocator
                    .allocate(core::mem::size_of::<Cb40>(), 32, 0)
                    .map_err(|_| DmaError::OutOfMemory)? as *mut Cb40;
                unsafe { raw.write(Cb40::zeroed()) };
                *slot = raw;
            }
            Blocks::Extended(ptrs)
        } else {
            let mut ptrs = [core::ptr::null_mut(); MAX_CYCLIC_BUFFERS];
            for slot in ptrs.iter_mut() {
                let raw = allocator
                    .allocate(core::mem::size_of::<Cb32>(), 32, 0)
                    .map_err(|_| DmaError::OutOfMemory)? as *mut Cb32;
                unsafe { raw.write(Cb32::zeroed()) };
                *slot = raw;
            }
            Blocks::Legacy(ptrs)
        };

        let this = Self {
            pool,
            irq,
            allocator,
            dma_base,
            channel,
            class,
            blocks,
            completion: spin::Mutex::new(CompletionState { routine: None, param: 0 }),
            cached_dest: spin::Mutex::new(None),
            buffer_index: AtomicU32::new(0),
            cyclic_n: AtomicU32::new(0),
            active: AtomicBool::new(false),
        };
        this.reset();
        Ok(this)
    }

    fn reset(&self) {
        mmio::peripheral_entry();
        let cs_addr = reg_addr(self.dma_base, self.channel, REG_CS);
        unsafe {
            write32(cs_addr, 1 << 31); // CS.RESET
            let timeout = Timeout::from_ms(10);
            while read32(cs_addr) & (1 << 31) != 0 {
                if timeout.is_expired() {
                    break;
                }
            }
        }
        mmio::peripheral_exit();
    }

    pub fn channel_number(&self) -> u32 {
        self.channel
    }

    fn block0_addr(&self) -> usize {
        match &self.blocks {
            Blocks::Legacy(ptrs) => ptrs[0] as usize,
            Blocks::Extended(ptrs) => ptrs[0] as usize,
        }
    }

    /// spec §4.2: memory-to-memory copy, `cached` recording the
    /// destination range for post-IRQ invalidation and pre-cleaning
    /// both sides when the buffers live in cacheable memory.
    pub fn setup_mem_copy(
        &self,
        dst: usize,
        src: usize,
        length: usize,
        burst_length: u8,
        cached: bool,
    ) -> Result<(), DmaError> {
        self.check_length(length)?;

        if cached {
            cache::clean_and_invalidate_data_cache_range(src, length);
            cache::clean_and_invalidate_data_cache_range(dst, length);
            *self.cached_dest.lock() = Some((dst, length));
        } else {
            *self.cached_dest.lock() = None;
        }

        let ti = ((burst_length as u32 & 0xF) << ti_bits::BURST_LENGTH_SHIFT)
            | ti_bits::SRC_WIDTH_32
            | ti_bits::SRC_INC
            | ti_bits::DEST_WIDTH_32
            | ti_bits::DEST_INC
            | ti_bits::NO_WIDE_BURSTS;

        self.write_block0(
            ti,
            bus_address(src as u32) as u64,
            bus_address(dst as u32) as u64,
            length as u32,
            0,
            0,
        );
        Ok(())
    }

    /// spec §4.2: peripheral-to-memory, only the memory side increments.
    /// `io_address` is a bus address the caller has already rebased
    /// (peripheral FIFO addresses are fixed constants, unlike buffer
    /// addresses the allocator hands out).
    pub fn setup_io_read(
        &self,
        dst: usize,
        io_address: u32,
        length: usize,
        dreq: Dreq,
    ) -> Result<(), DmaError> {
        self.check_length(length)?;
        *self.cached_dest.lock() = Some((dst, length));

        let ti = (dreq << ti_bits::PERMAP_SHIFT)
            | ti_bits::SRC_DREQ
            | ti_bits::DEST_WIDTH_32
            | ti_bits::DEST_INC
            | ti_bits::WAIT_RESP;

        self.write_block0(ti, io_address as u64, bus_address(dst as u32) as u64, length as u32, 0, 0);
        Ok(())
    }

    /// spec §4.2: memory-to-peripheral. `io_address` is already a bus
    /// address.
    pub fn setup_io_write(
        &self,
        io_address: u32,
        src: usize,
        length: usize,
        dreq: Dreq,
    ) -> Result<(), DmaError> {
        self.check_length(length)?;
        *self.cached_dest.lock() = None;

        let ti = (dreq << ti_bits::PERMAP_SHIFT)
            | ti_bits::DEST_DREQ
            | ti_bits::SRC_WIDTH_32
            | ti_bits::SRC_INC
            | ti_bits::WAIT_RESP;

        self.write_block0(ti, bus_address(src as u32) as u64, io_address as u64, length as u32, 0, 0);
        Ok(())
    }

    /// spec §4.2: a ring of up to [`MAX_CYCLIC_BUFFERS`] control blocks,
    /// each pointing at the next and the last at the first.
    pub fn setup_cyclic_io_write(
        &mut self,
        io_address: u32,
        sources: &[usize],
        length: usize,
        dreq: Dreq,
    ) -> Result<(), DmaError> {
        let n = sources.len();
        if n == 0 || n > MAX_CYCLIC_BUFFERS {
            return Err(DmaError::TooManyCyclicBuffers);
        }
        self.check_length(length)?;

        let ti = (dreq << ti_bits::PERMAP_SHIFT)
            | ti_bits::DEST_DREQ
            | ti_bits::SRC_WIDTH_32
            | ti_bits::SRC_INC
            | ti_bits::WAIT_RESP
            | ti_bits::INTEN;

        for i in 0..n {
            let next_idx = if i == n - 1 { 0 } else { i + 1 };
            let next_addr = self.block_bus_address(next_idx);
            self.write_block_at(
                i,
                ti,
                bus_address(sources[i] as u32) as u64,
                io_address as u64,
                length as u32,
                0,
                next_addr,
            );
        }

        self.cyclic_n.store(n as u32, Ordering::Release);
        self.buffer_index.store(0, Ordering::Release);
        *self.cached_dest.lock() = None;
        Ok(())
    }

    /// spec §4.2: strided 2-D copy (display scroll path). Unsupported
    /// on Lite channels, which have no 2-D mode.
    pub fn setup_mem_copy_2d(
        &self,
        dst: usize,
        src: usize,
        block_length: u32,
        block_count: u32,
        block_stride: i16,
        burst_length: u8,
    ) -> Result<(), DmaError> {
        if self.class == ChannelClass::Lite {
            return Err(DmaError::UnsupportedByChannelClass);
        }
        if block_length > 0xFFFF || block_count > 0x3FFF {
            return Err(DmaError::LengthExceedsCap);
        }

        let ti = ((burst_length as u32 & 0xF) << ti_bits::BURST_LENGTH_SHIFT)
            | ti_bits::SRC_WIDTH_32
            | ti_bits::SRC_INC
            | ti_bits::DEST_WIDTH_32
            | ti_bits::DEST_INC
            | ti_bits::TDMODE
            | ti_bits::NO_WIDE_BURSTS;

        let length = (block_count << 16) | (block_length & 0xFFFF);
        let stride = ((block_stride as u16 as u32) << 16) | (block_stride as u16 as u32);

        self.write_block0(
            ti,
            bus_address(src as u32) as u64,
            bus_address(dst as u32) as u64,
            length,
            stride,
            0,
        );
        Ok(())
    }

    fn check_length(&self, length: usize) -> Result<(), DmaError> {
        if length as u64 > length_cap(self.class) as u64 {
            Err(DmaError::LengthExceedsCap)
        } else {
            Ok(())
        }
    }

    fn block_bus_address(&self, index: usize) -> u64 {
        let addr = match &self.blocks {
            Blocks::Legacy(ptrs) => ptrs[index] as usize,
            Blocks::Extended(ptrs) => ptrs[index] as usize,
        };
        bus_address(addr as u32) as u64
    }

    fn write_block0(&self, ti: u32, source: u64, dest: u64, length: u32, stride: u32, next: u64) {
        self.write_block_at(0, ti, source, dest, length, stride, next);
    }

    fn write_block_at(
        &self,
        index: usize,
        ti: u32,
        source: u64,
        dest: u64,
        length: u32,
        stride: u32,
        next: u64,
    ) {
        match &self.blocks {
            Blocks::Legacy(ptrs) => unsafe {
                let cb = &mut *ptrs[index];
                cb.transfer_info = ti;
                cb.source_address = source as u32;
                cb.dest_address = dest as u32;
                cb.transfer_length = length;
                cb.stride_2d = stride;
                cb.next_control_block = next as u32;
                cache::clean_and_invalidate_data_cache_range(
                    ptrs[index] as usize,
                    core::mem::size_of::<Cb32>(),
                );
            },
            Blocks::Extended(ptrs) => unsafe {
                let cb = &mut *ptrs[index];
                cb.transfer_info = ti;
                cb.set_source_address(source);
                cb.set_dest_address(dest);
                cb.transfer_length = length;
                cb.stride_2d = stride;
                cb.next_control_block = next as u32;
                cache::clean_and_invalidate_data_cache_range(
                    ptrs[index] as usize,
                    core::mem::size_of::<Cb40>(),
                );
            },
        }
    }

    /// spec §4.2: attach an IRQ line to the channel's completion
    /// interrupt and store the callback.
    pub fn set_completion_routine(&self, routine: CompletionRoutine, param: *mut ()) {
        let mut state = self.completion.lock();
        state.routine = Some(routine);
        state.param = param as usize;
    }

    /// spec §4.2: write the first control-block address and the
    /// active bit, asserting the interrupt-enable bit first if a
    /// completion routine is attached.
    pub fn start(&self) -> Result<(), DmaError> {
        let cs_addr = reg_addr(self.dma_base, self.channel, REG_CS);
        let conblk_addr = reg_addr(self.dma_base, self.channel, REG_CONBLK_AD);

        if self.completion.lock().routine.is_some() {
            self.irq
                .connect(self.channel, dma_irq_trampoline, self as *const Self as *mut ())
                .ok();
        }

        mmio::peripheral_entry();
        unsafe {
            write32(conblk_addr, self.block_bus_address(0) as u32);
            write32(cs_addr, (1 << 28) | (1 << 0)); // WAIT_FOR_OUTSTANDING_WRITES | ACTIVE
        }
        mmio::peripheral_exit();
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// spec §4.2: busy-poll the active bit (no IRQ attached). Returns
    /// `true` if the error bit was clear, and invalidates the recorded
    /// destination range on return.
    pub fn wait(&self) -> bool {
        let cs_addr = reg_addr(self.dma_base, self.channel, REG_CS);
        let timeout = Timeout::from_ms(5000);
        crate::time::poll_until(timeout, || unsafe { read32(cs_addr) & (1 << 0) == 0 });

        let cs = unsafe { read32(cs_addr) };
        let success = cs & (1 << 8) == 0;
        self.active.store(false, Ordering::Release);
        self.invalidate_recorded_dest();
        success
    }

    fn invalidate_recorded_dest(&self) {
        if let Some((dest, length)) = *self.cached_dest.lock() {
            cache::invalidate_data_cache_range(dest, length);
        }
    }

    /// spec §4.2: clear the channel status register.
    pub fn cancel(&self) {
        let cs_addr = reg_addr(self.dma_base, self.channel, REG_CS);
        unsafe { write32(cs_addr, 0) };
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Completion-interrupt handler (spec §4.2 "Completion model").
    pub fn handle_interrupt(&self) {
        mmio::peripheral_entry();
        unsafe {
            // Acknowledge the shared DMA interrupt-status bit for this channel.
            write32(self.dma_base + INT_STATUS_OFFSET, 1 << self.channel);
        }
        let cs_addr = reg_addr(self.dma_base, self.channel, REG_CS);
        let cs = unsafe { read32(cs_addr) };
        // Snapshot and clear the per-channel INT bit (write-1-to-clear).
        unsafe { write32(cs_addr, cs & !(1 << 0) | (1 << 2)) };
        mmio::peripheral_exit();

        let success = cs & (1 << 8) == 0;
        let n = self.cyclic_n.load(Ordering::Acquire);

        if n > 0 {
            self.invalidate_recorded_dest();
            let finished = self.buffer_index.load(Ordering::Acquire);
            let next = (finished + 1) % n;
            self.buffer_index.store(next, Ordering::Release);
            self.invoke_completion(finished, success);
        } else {
            self.active.store(false, Ordering::Release);
            self.invalidate_recorded_dest();
            self.invoke_completion(0, success);
        }
    }

    fn invoke_completion(&self, buffer_index: u32, success: bool) {
        let state = self.completion.lock();
        if let Some(routine) = state.routine {
            routine(self.channel, buffer_index, success, state.param as *mut ());
        }
    }
}

impl<'a> Drop for DmaChannel<'a> {
    fn drop(&mut self) {
        self.cancel();
        if self.completion.lock().routine.is_some() {
            self.irq.disconnect(self.channel).ok();
        }
        self.reset();
        unsafe {
            let enable = read32(self.dma_base + ENABLE_OFFSET);
            write32(self.dma_base + ENABLE_OFFSET, enable & !(1 << self.channel));
        }
        let ptrs: [*mut u8; MAX_CYCLIC_BUFFERS] = match &self.blocks {
            Blocks::Legacy(p) => (*p).map(|b| b as *mut u8),
            Blocks::Extended(p) => (*p).map(|b| b as *mut u8),
        };
        for ptr in ptrs {
            if !ptr.is_null() {
                let _ = self.allocator.free(ptr);
            }
        }
        self.pool.free(self.channel);
    }
}

/// IRQ trampoline: the interrupt controller only knows a bare function
/// pointer and an opaque `param`; this recovers the originating
/// channel and forwards to its method.
fn dma_irq_trampoline(param: *mut ()) {
    let channel = unsafe { &*(param as *const DmaChannel) };
    channel.handle_interrupt();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeBus;

    #[test]
    fn mem_copy_rejects_oversized_length() {
        let pool = ChannelPool::new(0, 0);
        let irq = InterruptController::new();
        let mut regs = FakeBus::new(4096);
        let mut cb_backing = FakeBus::new(4096);
        let allocator = CoherentAllocator::new(cb_backing.base(), 4096);

        let chan =
            DmaChannel::new(&pool, &irq, &allocator, regs.base(), ChannelClass::Normal).unwrap();
        let over = length_cap(ChannelClass::Normal) as usize + 1;
        assert_eq!(
            chan.setup_mem_copy(0x2000, 0x3000, over, 2, false),
            Err(DmaError::LengthExceedsCap)
        );
    }

    #[test]
    fn cyclic_write_rejects_too_many_buffers() {
        let pool = ChannelPool::new(0, 0);
        let irq = InterruptController::new();
        let mut regs = FakeBus::new(4096);
        let mut cb_backing = FakeBus::new(4096);
        let allocator = CoherentAllocator::new(cb_backing.base(), 4096);

        let mut chan =
            DmaChannel::new(&pool, &irq, &allocator, regs.base(), ChannelClass::Normal).unwrap();
        let sources = [0usize; MAX_CYCLIC_BUFFERS + 1];
        assert_eq!(
            chan.setup_cyclic_io_write(0x7E20_3000, &sources, 4, DREQ_NONE),
            Err(DmaError::TooManyCyclicBuffers)
        );
    }

    #[test]
    fn lite_channel_rejects_2d_copy() {
        let pool = ChannelPool::new(1, 0);
        let irq = InterruptController::new();
        let mut regs = FakeBus::new(4096);
        let mut cb_backing = FakeBus::new(4096);
        let allocator = CoherentAllocator::new(cb_backing.base(), 4096);

        let chan =
            DmaChannel::new(&pool, &irq, &allocator, regs.base(), ChannelClass::Lite).unwrap();
        assert_eq!(
            chan.setup_mem_copy_2d(0x2000, 0x3000, 16, 4, 0, 2),
            Err(DmaError::UnsupportedByChannelClass)
        );
    }
}
