use std::{cell::Cell, collections::VecDeque};

use proptest::prelude::*;
use wifi_netif::{BufferAllocator, NetBuffer, Ownership, RingError, RxRing};

const SLOTS: usize = 4;
const BUFFER_SIZE: usize = 32;

/// Hands out at most the specified amount of buffers.
struct LimitedAllocator(Cell<usize>);
impl BufferAllocator for LimitedAllocator {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        let remaining = self.0.get().checked_sub(1)?;
        self.0.set(remaining);
        NetBuffer::try_with_capacity(capacity)
    }
}

#[derive(Clone, Debug)]
enum Op {
    Replenish(usize),
    Produce(u8, usize),
    Take,
}
fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..=SLOTS).prop_map(Op::Replenish),
        (any::<u8>(), 0..=BUFFER_SIZE + 2).prop_map(|(fill, len)| Op::Produce(fill, len)),
        Just(Op::Take),
    ]
}

proptest! {
    #[test]
    fn ownership_is_never_violated(ops in prop::collection::vec(op(), 1..64)) {
        let mut ring = RxRing::<SLOTS>::new(BUFFER_SIZE);
        let mut in_flight = VecDeque::new();
        for op in ops {
            match op {
                Op::Replenish(budget) => {
                    let vacant = ring.count(Ownership::Vacant);
                    let replenished = ring.replenish(LimitedAllocator(Cell::new(budget)));
                    prop_assert_eq!(replenished, vacant.min(budget));
                }
                Op::Produce(fill, len) => {
                    let frame = vec![fill; len];
                    let host_before = ring.count(Ownership::Host);
                    match ring.produce(&frame) {
                        Ok(()) => in_flight.push_back(frame),
                        Err(RingError::Full) => {
                            prop_assert!(host_before > 0);
                        }
                        Err(RingError::TooLarge) => {
                            prop_assert!(len > BUFFER_SIZE);
                        }
                        Err(RingError::Empty) => {
                            prop_assert_eq!(len, 0);
                        }
                        Err(RingError::NoBuffer) => {
                            prop_assert!(ring.count(Ownership::Vacant) > 0);
                        }
                    }
                    // A rejected frame never touches a slot owned by the host.
                    prop_assert!(ring.count(Ownership::Host) >= host_before);
                }
                Op::Take => {
                    let taken = ring.take_ready();
                    let expected = in_flight.pop_front();
                    prop_assert_eq!(
                        taken.as_ref().map(|buffer| buffer.payload().to_vec()),
                        expected
                    );
                }
            }
            prop_assert_eq!(ring.count(Ownership::Host), in_flight.len());
            prop_assert_eq!(
                ring.count(Ownership::Vacant)
                    + ring.count(Ownership::Firmware)
                    + ring.count(Ownership::Host),
                SLOTS
            );
        }
    }

    #[test]
    fn replenishing_a_full_ring_is_a_no_op(produced in 0..=SLOTS) {
        let mut ring = RxRing::<SLOTS>::new(BUFFER_SIZE);
        let allocator = LimitedAllocator(Cell::new(usize::MAX));
        ring.replenish(&allocator);
        for i in 0..produced {
            ring.produce(&[i as u8]).unwrap();
        }
        let remaining = allocator.0.get();
        prop_assert_eq!(ring.replenish(&allocator), 0);
        prop_assert_eq!(allocator.0.get(), remaining);
    }
}
