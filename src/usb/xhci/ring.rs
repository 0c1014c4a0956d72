//! xHCI producer/consumer rings (spec §4.5 "Ring").
//!
//! A [`ProducerRing`] backs a transfer ring (one per endpoint) or the
//! single command ring: the driver writes TRBs at `enqueue`, and the
//! last slot is always a Link TRB back to the first with `TOGGLE_CYCLE`
//! set, so every wrap flips the producer's cycle bit (spec §8 invariant:
//! "the `cycle_state` flips exactly once per wrap").
//!
//! An [`EventRing`] is the consumer side the driver polls from its ISR:
//! hardware writes event TRBs and the driver walks forward while the
//! TRB's cycle bit matches the ring's expected value, which itself
//! flips on wrap (the driver never writes to this ring, so there is no
//! Link TRB -- a single-segment event ring wraps by address alone).

use super::trb::{control_bits, Trb, TrbType};

/// Per spec §9 ("Model as arena indices in a coherent-memory pool ...
/// the link between blocks is a typed index, not a pointer"), ring
/// positions are plain indices into the backing array the caller owns
/// (coherent memory in production, a `Vec<Trb>` under test), never raw
/// pointers threaded through this type.
pub struct ProducerRing {
    capacity: usize,
    enqueue: usize,
    cycle_state: bool,
}

impl ProducerRing {
    /// `capacity` includes the trailing Link TRB slot; a ring of `n`
    /// usable TRBs is constructed with `capacity = n + 1`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "a ring needs at least one data slot plus a link TRB");
        Self {
            capacity,
            enqueue: 0,
            cycle_state: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle_state
    }

    pub fn enqueue_index(&self) -> usize {
        self.enqueue
    }

    /// The index the Link TRB occupies (always the last slot).
    fn link_index(&self) -> usize {
        self.capacity - 1
    }

    /// Build the Link TRB this ring needs at construction time, pointed
    /// at `segment_base` (the bus address of slot 0). Call once before
    /// the ring is exposed to hardware.
    pub fn link_trb(&self, segment_base: u64) -> Trb {
        Trb {
            parameter: segment_base,
            status: 0,
            control: TrbType::Link.control_bits() | control_bits::TOGGLE_CYCLE | self.cycle_bit(),
        }
    }

    fn cycle_bit(&self) -> u32 {
        if self.cycle_state {
            control_bits::CYCLE
        } else {
            0
        }
    }

    /// Place `trb` (with its cycle bit already stamped by the caller
    /// via [`ProducerRing::stamp`]) at the current enqueue index and
    /// advance, flipping `cycle_state` and wrapping back to slot 0
    /// whenever the link slot is reached.
    ///
    /// Returns the index the TRB was written to and whether the link
    /// TRB's cycle bit must be rewritten (the caller owns the backing
    /// array and performs the actual write).
    pub fn enqueue(&mut self) -> EnqueueSlot {
        let index = self.enqueue;
        self.enqueue += 1;

        let mut link_flip = None;
        if self.enqueue == self.link_index() {
            link_flip = Some((self.link_index(), self.cycle_bit()));
            self.enqueue = 0;
            self.cycle_state = !self.cycle_state;
        }
        EnqueueSlot {
            index,
            cycle: self.cycle_bit() ^ if link_flip.is_some() { control_bits::CYCLE } else { 0 },
            link_flip,
        }
    }

    /// Stamp `trb`'s control word with the cycle bit a TRB written at
    /// `slot.index` must carry (the bit in effect *before* any wrap
    /// triggered by this enqueue, since the TRB being written is not
    /// the Link TRB itself).
    pub fn stamp(&self, trb: &mut Trb, slot: &EnqueueSlot) {
        trb.control = (trb.control & !control_bits::CYCLE) | slot.cycle;
    }
}

/// Result of [`ProducerRing::enqueue`]: where to write the new TRB, the
/// cycle bit value it must carry, and, if this enqueue wrapped the
/// ring, the link TRB slot whose own cycle bit the caller must flip
/// before describing the advance to hardware.
pub struct EnqueueSlot {
    pub index: usize,
    cycle: u32,
    pub link_flip: Option<(usize, u32)>,
}

impl EnqueueSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Consumer side of the command/event rings: the driver polls forward
/// from `dequeue` while the TRB it finds there carries the ring's
/// expected cycle bit.
pub struct EventRing {
    capacity: usize,
    dequeue: usize,
    cycle_state: bool,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            dequeue: 0,
            cycle_state: true,
        }
    }

    pub fn dequeue_index(&self) -> usize {
        self.dequeue
    }

    /// Given the TRB currently sitting at `dequeue`, decide whether it
    /// is new (cycle bit matches) and if so advance past it, wrapping
    /// and flipping the expected cycle bit at the end of the segment.
    pub fn poll(&mut self, trb_at_dequeue: &Trb) -> bool {
        if trb_at_dequeue.cycle_bit() != self.cycle_state {
            return false;
        }
        self.dequeue += 1;
        if self.dequeue == self.capacity {
            self.dequeue = 0;
            self.cycle_state = !self.cycle_state;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_ring_flips_cycle_exactly_once_per_wrap() {
        let mut ring = ProducerRing::new(4); // 3 data slots + link
        assert!(ring.cycle_state());

        let s0 = ring.enqueue();
        assert_eq!(s0.index(), 0);
        assert!(s0.link_flip.is_none());

        let s1 = ring.enqueue();
        assert_eq!(s1.index(), 1);

        let s2 = ring.enqueue();
        assert_eq!(s2.index(), 2);
        assert!(s2.link_flip.is_some(), "enqueuing the last data slot must flip at the link");
        assert!(!ring.cycle_state());

        let s3 = ring.enqueue();
        assert_eq!(s3.index(), 0, "producer wraps back to slot 0 after the link TRB");
    }

    #[test]
    fn stamp_sets_cycle_bit_matching_slot() {
        let mut ring = ProducerRing::new(4);
        let slot = ring.enqueue();
        let mut trb = Trb::zeroed();
        ring.stamp(&mut trb, &slot);
        assert!(trb.cycle_bit());
    }

    #[test]
    fn event_ring_only_advances_on_matching_cycle_bit() {
        let mut ring = EventRing::new(2);
        let mut stale = Trb::zeroed();
        stale.control = 0; // cycle bit clear, ring expects set
        assert!(!ring.poll(&stale));

        let mut fresh = Trb::zeroed();
        fresh.control = control_bits::CYCLE;
        assert!(ring.poll(&fresh));
        assert_eq!(ring.dequeue_index(), 1);

        assert!(ring.poll(&fresh));
        assert_eq!(ring.dequeue_index(), 0, "wraps after the last slot");
    }

    #[test]
    fn link_trb_carries_toggle_cycle_and_points_at_segment_base() {
        let ring = ProducerRing::new(4);
        let link = ring.link_trb(0x1000);
        assert_eq!(link.parameter, 0x1000);
        assert!(link.control & control_bits::TOGGLE_CYCLE != 0);
        assert_eq!(link.trb_type_bits(), TrbType::Link as u32);
    }
}
