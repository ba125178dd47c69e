//! Fixed-capacity arena of free-range nodes.
//!
//! Slots are addressed by index. Vacant slots form an intrusive stack threaded
//! through the slots themselves, so taking and returning a slot is O(1) and
//! never allocates.

use alloc::vec::Vec;
use core::fmt;

/// Index of a slot in the arena.
pub(super) type NodeIndex = usize;

/// One contiguous span of free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FreeRange {
    pub(super) offset: u64,
    pub(super) size: u64,
    /// Next free range in offset order.
    pub(super) next: Option<NodeIndex>,
}

impl FreeRange {
    pub(super) fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Vacant { next_vacant: Option<NodeIndex> },
    Occupied(FreeRange),
}

/// Storage for one node of a [`FreeList`](crate::FreeList).
///
/// Callers only ever handle these through a `Vec<NodeSlot>` whose capacity
/// they reserve up front, see
/// [`FreeList::required_capacity`](crate::FreeList::required_capacity).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NodeSlot(SlotState);

impl fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SlotState::Vacant { .. } => f.write_str("Vacant"),
            SlotState::Occupied(range) => write!(
                f,
                "Occupied({:#x}..{:#x})",
                range.offset,
                range.end()
            ),
        }
    }
}

pub(super) struct NodeArena {
    slots: Vec<NodeSlot>,
    vacant_head: Option<NodeIndex>,
    occupied: usize,
}

impl NodeArena {
    /// Builds an arena of `capacity` vacant slots on top of `storage`.
    ///
    /// `storage` must already have room for `capacity` slots; its previous
    /// contents are discarded.
    pub(super) fn new(mut storage: Vec<NodeSlot>, capacity: usize) -> Self {
        assert!(
            storage.capacity() >= capacity,
            "Node storage must hold at least {capacity} slots"
        );
        storage.clear();
        storage.resize(capacity, NodeSlot(SlotState::Vacant { next_vacant: None }));
        let mut this = Self {
            slots: storage,
            vacant_head: None,
            occupied: 0,
        };
        this.reset();
        this
    }

    /// Marks every slot vacant.
    pub(super) fn reset(&mut self) {
        let len = self.slots.len();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let next_vacant = (index + 1 < len).then_some(index + 1);
            *slot = NodeSlot(SlotState::Vacant { next_vacant });
        }
        self.vacant_head = (len > 0).then_some(0);
        self.occupied = 0;
    }

    pub(super) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn occupied(&self) -> usize {
        self.occupied
    }

    /// Stores `range` in a vacant slot.
    ///
    /// Returns `None` if every slot is occupied.
    pub(super) fn insert(&mut self, range: FreeRange) -> Option<NodeIndex> {
        let index = self.vacant_head?;
        let slot = &mut self.slots[index];
        let SlotState::Vacant { next_vacant } = slot.0 else {
            unreachable!("vacant stack points at occupied slot {index}");
        };
        slot.0 = SlotState::Occupied(range);
        self.vacant_head = next_vacant;
        self.occupied += 1;
        Some(index)
    }

    /// Vacates the slot at `index` and returns the range it held.
    pub(super) fn remove(&mut self, index: NodeIndex) -> FreeRange {
        let range = *self.get(index);
        self.slots[index].0 = SlotState::Vacant {
            next_vacant: self.vacant_head,
        };
        self.vacant_head = Some(index);
        self.occupied -= 1;
        range
    }

    pub(super) fn get(&self, index: NodeIndex) -> &FreeRange {
        match &self.slots[index].0 {
            SlotState::Occupied(range) => range,
            SlotState::Vacant { .. } => unreachable!("node {index} is vacant"),
        }
    }

    pub(super) fn get_mut(&mut self, index: NodeIndex) -> &mut FreeRange {
        match &mut self.slots[index].0 {
            SlotState::Occupied(range) => range,
            SlotState::Vacant { .. } => unreachable!("node {index} is vacant"),
        }
    }

    /// Releases the underlying storage.
    pub(super) fn into_storage(self) -> Vec<NodeSlot> {
        self.slots
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn range(offset: u64, size: u64) -> FreeRange {
        FreeRange {
            offset,
            size,
            next: None,
        }
    }

    #[test]
    fn test_insert_until_full() {
        let mut arena = NodeArena::new(Vec::with_capacity(3), 3);
        assert_eq!(arena.capacity(), 3);
        let a = arena.insert(range(0, 1)).unwrap();
        let b = arena.insert(range(2, 1)).unwrap();
        let c = arena.insert(range(4, 1)).unwrap();
        assert!(arena.insert(range(6, 1)).is_none());
        assert_eq!(arena.occupied(), 3);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(arena.get(b).offset, 2);
    }

    #[test]
    fn test_remove_reuses_slot() {
        let mut arena = NodeArena::new(Vec::with_capacity(2), 2);
        let a = arena.insert(range(0, 8)).unwrap();
        let _b = arena.insert(range(16, 8)).unwrap();

        let removed = arena.remove(a);
        assert_eq!(removed, range(0, 8));
        assert_eq!(arena.occupied(), 1);

        let c = arena.insert(range(32, 8)).unwrap();
        assert_eq!(c, a);
        assert_eq!(arena.get(c).offset, 32);
    }

    #[test]
    fn test_reset() {
        let mut arena = NodeArena::new(Vec::with_capacity(4), 4);
        for i in 0..4 {
            arena.insert(range(i * 2, 1)).unwrap();
        }
        arena.reset();
        assert_eq!(arena.occupied(), 0);
        for i in 0..4 {
            arena.insert(range(i * 2, 1)).unwrap();
        }
        assert!(arena.insert(range(8, 1)).is_none());
    }

    #[test]
    fn test_storage_is_not_reallocated() {
        let storage: Vec<NodeSlot> = Vec::with_capacity(8);
        let ptr = storage.as_ptr();
        let arena = NodeArena::new(storage, 8);
        let storage = arena.into_storage();
        assert_eq!(storage.as_ptr(), ptr);
        assert_eq!(storage.len(), 8);
    }

    #[test]
    #[should_panic(expected = "Node storage must hold at least 4 slots")]
    fn test_undersized_storage() {
        let _ = NodeArena::new(Vec::with_capacity(2), 4);
    }

    #[test]
    #[should_panic(expected = "node 0 is vacant")]
    fn test_get_vacant() {
        let arena = NodeArena::new(Vec::with_capacity(1), 1);
        let _ = arena.get(0);
    }
}
