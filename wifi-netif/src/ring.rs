use core::{array, mem};

use crate::buffer::{BufferAllocator, NetBuffer};

/// Who may touch the buffer of a ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ownership {
    /// No buffer is attached. The slot waits for replenishment.
    Vacant,
    /// An empty buffer is attached, which the firmware may write to.
    Firmware,
    /// The firmware wrote a frame into the buffer and handed it to the host.
    Host,
}

enum Slot {
    Vacant,
    Firmware(NetBuffer),
    Host(NetBuffer),
}
impl Slot {
    const fn ownership(&self) -> Ownership {
        match self {
            Self::Vacant => Ownership::Vacant,
            Self::Firmware(_) => Ownership::Firmware,
            Self::Host(_) => Ownership::Host,
        }
    }
    /// The firmware writes `frame` into the attached buffer and flips ownership to the host.
    ///
    /// On failure the slot is returned unchanged.
    fn complete_dma(self, frame: &[u8]) -> Result<Self, (Self, RingError)> {
        match self {
            Self::Firmware(mut buffer) => {
                if frame.is_empty() {
                    return Err((Self::Firmware(buffer), RingError::Empty));
                }
                if !buffer.fill(frame) {
                    return Err((Self::Firmware(buffer), RingError::TooLarge));
                }
                Ok(Self::Host(buffer))
            }
            Self::Host(buffer) => Err((Self::Host(buffer), RingError::Full)),
            Self::Vacant => Err((Self::Vacant, RingError::NoBuffer)),
        }
    }
}

/// Why the firmware producer couldn't place a frame into the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    /// The head slot still holds a frame, that the host hasn't consumed yet.
    Full,
    /// The head slot has no buffer attached, since replenishment failed or didn't run yet.
    NoBuffer,
    /// The frame is larger than the slot buffer.
    TooLarge,
    /// The firmware reported a zero length frame.
    Empty,
}

/// A fixed size ring of receive buffers shared between the firmware (producer) and the RX task
/// (consumer).
///
/// The firmware fills the slot at `head`, the host consumes the slot at `tail`. Each slot flips
/// from [Ownership::Firmware] to [Ownership::Host] exactly once per frame. Consumed slots become
/// [Ownership::Vacant] and only [RxRing::replenish] attaches a fresh buffer again, so a buffer
/// handed to the stack is never written by the firmware afterwards.
pub struct RxRing<const N: usize> {
    slots: [Slot; N],
    head: usize,
    tail: usize,
    buffer_size: usize,
}
impl<const N: usize> RxRing<N> {
    /// Create a ring, where every slot is vacant.
    pub fn new(buffer_size: usize) -> Self {
        const { assert!(N > 0, "An RX ring needs at least one slot.") };
        Self {
            slots: array::from_fn(|_| Slot::Vacant),
            head: 0,
            tail: 0,
            buffer_size,
        }
    }
    pub const fn capacity(&self) -> usize {
        N
    }
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
    /// The ownership of the slot at `index`.
    pub fn ownership(&self, index: usize) -> Option<Ownership> {
        self.slots.get(index).map(Slot::ownership)
    }
    /// The number of slots in the specified state.
    pub fn count(&self, ownership: Ownership) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.ownership() == ownership)
            .count()
    }
    /// Attach a freshly allocated buffer to every vacant slot.
    ///
    /// Allocation failures leave the slot vacant, so a later call can retry. Returns the amount
    /// of slots, that were replenished.
    pub fn replenish(&mut self, allocator: impl BufferAllocator) -> usize {
        let mut replenished = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !matches!(slot, Slot::Vacant) {
                continue;
            }
            match allocator.allocate(self.buffer_size) {
                Some(buffer) => {
                    *slot = Slot::Firmware(buffer);
                    replenished += 1;
                }
                None => {
                    debug!("RX buffer allocation failed for slot {}.", index);
                }
            }
        }
        if replenished != 0 {
            trace!("Replenished {} RX slots.", replenished);
        }
        replenished
    }
    /// Place a frame into the head slot, as the firmware DMA engine does.
    pub fn produce(&mut self, frame: &[u8]) -> Result<(), RingError> {
        let slot = &mut self.slots[self.head];
        match mem::replace(slot, Slot::Vacant).complete_dma(frame) {
            Ok(filled) => {
                *slot = filled;
                trace!("Frame of {} bytes placed at slot {}.", frame.len(), self.head);
                self.head = (self.head + 1) % N;
                Ok(())
            }
            Err((unchanged, err)) => {
                *slot = unchanged;
                Err(err)
            }
        }
    }
    /// Take the frame out of the tail slot, if the firmware handed it to the host.
    ///
    /// This never replenishes the slot.
    pub fn take_ready(&mut self) -> Option<NetBuffer> {
        let slot = &mut self.slots[self.tail];
        if !matches!(slot, Slot::Host(buffer) if !buffer.is_empty()) {
            return None;
        }
        let Slot::Host(buffer) = mem::replace(slot, Slot::Vacant) else {
            return None;
        };
        trace!("Took {} bytes from slot {}.", buffer.len(), self.tail);
        self.tail = (self.tail + 1) % N;
        Some(buffer)
    }
    /// Drop all frames, which haven't been taken yet.
    ///
    /// Their slots become vacant and need to be replenished.
    pub fn clear(&mut self) {
        while let Some(_frame) = self.take_ready() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{HeapAllocator, NetBuffer};
    use core::cell::Cell;

    /// Fails every allocation after the budget is spent.
    struct BudgetAllocator(Cell<usize>);
    impl BufferAllocator for BudgetAllocator {
        fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
            let budget = self.0.get();
            if budget == 0 {
                return None;
            }
            self.0.set(budget - 1);
            NetBuffer::try_with_capacity(capacity)
        }
    }

    #[test]
    fn frames_are_taken_in_order() {
        let mut ring = RxRing::<4>::new(64);
        assert_eq!(ring.replenish(HeapAllocator), 4);
        for i in 0..3u8 {
            ring.produce(&[i; 10]).unwrap();
        }
        assert_eq!(ring.count(Ownership::Host), 3);
        for i in 0..3u8 {
            assert_eq!(ring.take_ready().unwrap().payload(), &[i; 10]);
        }
        assert!(ring.take_ready().is_none());
        assert_eq!(ring.count(Ownership::Vacant), 3);
    }

    #[test]
    fn full_ring_rejects_frames() {
        let mut ring = RxRing::<2>::new(64);
        ring.replenish(HeapAllocator);
        ring.produce(&[1]).unwrap();
        ring.produce(&[2]).unwrap();
        assert_eq!(ring.produce(&[3]), Err(RingError::Full));
        assert_eq!(ring.take_ready().unwrap().payload(), &[1]);
        // The consumed slot has no buffer until the next replenishment.
        assert_eq!(ring.produce(&[3]), Err(RingError::NoBuffer));
        assert_eq!(ring.replenish(HeapAllocator), 1);
        assert_eq!(ring.produce(&[3]), Ok(()));
    }

    #[test]
    fn replenish_is_idempotent() {
        let mut ring = RxRing::<3>::new(32);
        assert_eq!(ring.replenish(HeapAllocator), 3);
        let allocator = BudgetAllocator(Cell::new(10));
        assert_eq!(ring.replenish(&allocator), 0);
        assert_eq!(allocator.0.get(), 10);
    }

    #[test]
    fn allocation_failure_leaves_slots_vacant() {
        let mut ring = RxRing::<4>::new(32);
        assert_eq!(ring.replenish(BudgetAllocator(Cell::new(1))), 1);
        assert_eq!(ring.count(Ownership::Vacant), 3);
        ring.produce(&[7]).unwrap();
        assert_eq!(ring.produce(&[8]), Err(RingError::NoBuffer));
        assert_eq!(ring.replenish(BudgetAllocator(Cell::new(0))), 0);
        assert_eq!(ring.replenish(HeapAllocator), 3);
        assert_eq!(ring.produce(&[8]), Ok(()));
    }

    #[test]
    fn oversized_and_empty_frames_keep_slot() {
        let mut ring = RxRing::<2>::new(4);
        ring.replenish(HeapAllocator);
        assert_eq!(ring.produce(&[0; 5]), Err(RingError::TooLarge));
        assert_eq!(ring.produce(&[]), Err(RingError::Empty));
        assert_eq!(ring.ownership(0), Some(Ownership::Firmware));
        assert_eq!(ring.produce(&[0; 4]), Ok(()));
        assert_eq!(ring.ownership(0), Some(Ownership::Host));
    }

    #[test]
    fn clear_drops_pending_frames() {
        let mut ring = RxRing::<3>::new(8);
        ring.replenish(HeapAllocator);
        ring.produce(&[1]).unwrap();
        ring.produce(&[2]).unwrap();
        ring.clear();
        assert!(ring.take_ready().is_none());
        assert_eq!(ring.count(Ownership::Vacant), 2);
        assert_eq!(ring.count(Ownership::Firmware), 1);
    }
}
