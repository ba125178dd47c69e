//! Free-list sub-allocator over an abstract address space.
//!
//! [`FreeList`] tracks which byte ranges of `0..total_size` are free. It never
//! touches the memory it describes; callers translate offsets into whatever
//! the space represents (a CPU buffer, a GPU buffer, a file region).
//!
//! # Algorithm
//!
//! - **Free List**: free ranges are kept in a singly-linked chain sorted by
//!   offset. No two ranges in the chain touch; adjacent ranges are always
//!   merged.
//! - **Allocation**: first fit. The chain is scanned from the lowest offset
//!   and the first range that is large enough is shrunk from the front, or
//!   unlinked if it is an exact fit.
//! - **Deallocation**: the freed range is placed in offset order and merged
//!   with its left and/or right neighbour.
//!
//! # Node Storage
//!
//! Chain nodes live in a fixed-capacity arena backed by a `Vec<NodeSlot>`
//! that the caller allocates. The list never grows that vector, so the only
//! allocations are the ones the caller makes. Construction is two-phase:
//!
//! ```rust
//! use suballoc::{FreeList, FreeListConfig};
//!
//! let config = FreeListConfig::default();
//! let storage = Vec::with_capacity(FreeList::required_capacity(1024, &config));
//! let mut list = FreeList::new(1024, config, storage).unwrap();
//!
//! let a = list.allocate_block(100).unwrap();
//! let b = list.allocate_block(200).unwrap();
//! assert_eq!((a, b), (0, 100));
//!
//! list.free_block(100, a).unwrap();
//! list.free_block(200, b).unwrap();
//! assert_eq!(list.free_space(), 1024);
//! ```
//!
//! # Performance Characteristics
//!
//! - **Allocation**: O(n) where n is the number of free ranges
//! - **Deallocation**: O(n) where n is the number of free ranges
//! - **Node slot reuse**: O(1)
//!
//! # Thread Safety
//!
//! [`FreeList`] has no interior mutability. Share it between threads behind a
//! lock.

use alloc::vec::Vec;
use core::{fmt, iter::FusedIterator, mem, ops::Range};

use snafu::ensure;

use self::arena::{FreeRange, NodeArena, NodeIndex};
pub use self::arena::NodeSlot;
use crate::{
    FreeListConfig,
    error::{
        CapacityExceededSnafu, FreeListError, InvalidArgumentSnafu, InvalidFreeSnafu,
        OutOfSpaceSnafu,
    },
};

mod arena;

/// Tracks free byte ranges inside `0..total_size`.
pub struct FreeList {
    total_size: u64,
    config: FreeListConfig,
    head: Option<NodeIndex>,
    nodes: NodeArena,
}

/// Where a block would be carved out of a free range.
struct Fit {
    prev: Option<NodeIndex>,
    index: NodeIndex,
    offset: u64,
}

/// Outcome of a first-fit search.
enum Search {
    Found(Fit),
    /// Some range is large enough, but each one needs a node the arena
    /// cannot provide.
    ArenaFull,
    NoRange,
}

impl FreeList {
    /// Returns the number of node slots needed to track `total_size` bytes.
    ///
    /// The storage passed to [`new`](Self::new) must have at least this much
    /// capacity.
    #[must_use]
    pub fn required_capacity(total_size: u64, config: &FreeListConfig) -> usize {
        config.max_nodes(total_size)
    }

    /// Returns the number of node slots [`resize`](Self::resize) needs to grow
    /// this list to `new_size` bytes.
    ///
    /// This is `required_capacity(new_size, config)`, raised when the current
    /// fragments plus a node for the new tail would not fit in it.
    #[must_use]
    pub fn required_capacity_for_resize(&self, new_size: u64) -> usize {
        usize::max(
            Self::required_capacity(new_size, &self.config),
            self.fragment_count().saturating_add(1),
        )
    }

    /// Returns the number of bytes of bookkeeping needed to track
    /// `total_size` bytes: the list header plus its node storage.
    #[must_use]
    pub fn memory_requirement(total_size: u64, config: &FreeListConfig) -> usize {
        size_of::<Self>().saturating_add(
            Self::required_capacity(total_size, config).saturating_mul(size_of::<NodeSlot>()),
        )
    }

    /// Creates a list whose whole space `0..total_size` is free.
    ///
    /// `storage` becomes the node arena. Its contents are discarded and its
    /// capacity must be at least
    /// [`required_capacity(total_size, &config)`](Self::required_capacity).
    pub fn new(
        total_size: u64,
        config: FreeListConfig,
        storage: Vec<NodeSlot>,
    ) -> Result<Self, FreeListError> {
        ensure!(
            total_size > 0,
            InvalidArgumentSnafu {
                reason: "total size must be greater than zero",
            }
        );
        let capacity = Self::required_capacity(total_size, &config);
        ensure!(
            storage.capacity() >= capacity,
            InvalidArgumentSnafu {
                reason: "node storage is smaller than the required capacity",
            }
        );

        let mut this = Self {
            total_size,
            config,
            head: None,
            nodes: NodeArena::new(storage, capacity),
        };
        this.clear();
        log::debug!(
            "FreeList::new({total_size:#x}): {} node slots",
            this.nodes.capacity()
        );
        Ok(this)
    }

    /// Returns the number of bytes under management.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the capacity of the node arena.
    #[must_use]
    pub fn max_nodes(&self) -> usize {
        self.nodes.capacity()
    }

    /// Returns the configuration this list was created with.
    #[must_use]
    pub fn config(&self) -> &FreeListConfig {
        &self.config
    }

    /// Returns the number of disjoint free ranges.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.nodes.occupied()
    }

    /// Returns an iterator over the free ranges in ascending offset order.
    #[must_use]
    pub fn iter(&self) -> FreeRanges<'_> {
        FreeRanges {
            nodes: &self.nodes,
            current: self.head,
            remaining: self.nodes.occupied(),
        }
    }

    /// Returns the total number of free bytes.
    ///
    /// This walks the whole chain; it is meant for diagnostics.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.iter().map(|range| range.end - range.start).sum()
    }

    /// Returns the size of the largest free range, or zero if the space is
    /// fully allocated.
    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.iter()
            .map(|range| range.end - range.start)
            .max()
            .unwrap_or(0)
    }

    /// Allocates `size` bytes and returns their offset.
    ///
    /// The lowest free range that can hold `size` bytes is used.
    pub fn allocate_block(&mut self, size: u64) -> Result<u64, FreeListError> {
        self.allocate_block_biased(size, 1, 0)
    }

    /// Allocates `size` bytes at an offset that is a multiple of `align`.
    ///
    /// `align` must be a power of two. Free the block with
    /// [`free_block`](Self::free_block) and the same `size`.
    pub fn allocate_block_aligned(&mut self, size: u64, align: u64) -> Result<u64, FreeListError> {
        self.allocate_block_biased(size, align, 0)
    }

    /// Allocates `size` bytes at an offset where `bias + offset` is a multiple
    /// of `align`.
    pub(crate) fn allocate_block_biased(
        &mut self,
        size: u64,
        align: u64,
        bias: u64,
    ) -> Result<u64, FreeListError> {
        ensure!(
            size > 0,
            InvalidArgumentSnafu {
                reason: "size must be greater than zero",
            }
        );
        ensure!(
            align.is_power_of_two(),
            InvalidArgumentSnafu {
                reason: "alignment must be a power of two",
            }
        );

        let fit = match self.find_first_fit(size, align, bias) {
            Search::Found(fit) => fit,
            Search::ArenaFull => return self.capacity_exceeded(),
            Search::NoRange => {
                let free_space = self.free_space();
                log::warn!(
                    "FreeList::allocate_block({size:#x}, align={align:#x}): no suitable range \
                     ({free_space:#x} bytes free in {} fragments)",
                    self.fragment_count()
                );
                return OutOfSpaceSnafu { size, free_space }.fail();
            }
        };

        let node = *self.nodes.get(fit.index);
        let alloc_end = fit.offset + size;
        if fit.offset == node.offset {
            if node.size == size {
                self.unlink(fit.prev, fit.index);
            } else {
                let node = self.nodes.get_mut(fit.index);
                node.offset += size;
                node.size -= size;
            }
        } else {
            // Padding in front of the block stays in this node; whatever is
            // left after the block needs a node of its own.
            if alloc_end < node.end() {
                let Some(tail) = self.nodes.insert(FreeRange {
                    offset: alloc_end,
                    size: node.end() - alloc_end,
                    next: node.next,
                }) else {
                    return self.capacity_exceeded();
                };
                self.nodes.get_mut(fit.index).next = Some(tail);
            }
            self.nodes.get_mut(fit.index).size = fit.offset - node.offset;
        }

        log::trace!("FreeList::allocate_block({size:#x}): {:#x}", fit.offset);
        Ok(fit.offset)
    }

    /// Returns `size` bytes at `offset` to the list.
    ///
    /// The range is merged with adjacent free ranges. Freeing a range that
    /// overlaps free space fails with [`FreeListError::InvalidFree`].
    pub fn free_block(&mut self, size: u64, offset: u64) -> Result<(), FreeListError> {
        ensure!(
            size > 0,
            InvalidArgumentSnafu {
                reason: "size must be greater than zero",
            }
        );
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.total_size);
        let Some(end) = end else {
            return InvalidArgumentSnafu {
                reason: "block lies outside the tracked space",
            }
            .fail();
        };

        // `prev` is the last range starting below `offset`, `next` the first
        // one starting at or above it.
        let mut prev = None;
        let mut next = self.head;
        while let Some(index) = next {
            let node = self.nodes.get(index);
            if node.offset >= offset {
                break;
            }
            prev = Some(index);
            next = node.next;
        }

        let prev_node = prev.map(|index| *self.nodes.get(index));
        let next_node = next.map(|index| *self.nodes.get(index));
        let overlaps_prev = prev_node.is_some_and(|node| node.end() > offset);
        let overlaps_next = next_node.is_some_and(|node| end > node.offset);
        if overlaps_prev || overlaps_next {
            log::error!(
                "FreeList::free_block({size:#x}, {offset:#x}): range overlaps free space"
            );
            return InvalidFreeSnafu { offset, size }.fail();
        }

        let merge_prev = prev_node.is_some_and(|node| node.end() == offset);
        let merge_next = next_node.is_some_and(|node| node.offset == end);
        match (prev, next) {
            (Some(prev), Some(next)) if merge_prev && merge_next => {
                let next_node = self.nodes.remove(next);
                let prev_node = self.nodes.get_mut(prev);
                prev_node.size += size + next_node.size;
                prev_node.next = next_node.next;
            }
            (Some(prev), _) if merge_prev => {
                self.nodes.get_mut(prev).size += size;
            }
            (_, Some(next)) if merge_next => {
                let next_node = self.nodes.get_mut(next);
                next_node.offset = offset;
                next_node.size += size;
            }
            _ => {
                let Some(index) = self.nodes.insert(FreeRange { offset, size, next }) else {
                    return self.capacity_exceeded();
                };
                self.link_after(prev, index);
            }
        }

        log::trace!("FreeList::free_block({size:#x}, {offset:#x})");
        Ok(())
    }

    /// Frees the `size`-byte block at `offset` and allocates `new_size` bytes.
    ///
    /// Returns the offset of the new block, which may equal `offset`. On
    /// failure the original block stays allocated and the list is unchanged.
    /// Moving the block contents is up to the caller.
    pub fn reallocate_block(
        &mut self,
        size: u64,
        new_size: u64,
        offset: u64,
    ) -> Result<u64, FreeListError> {
        ensure!(
            new_size > 0,
            InvalidArgumentSnafu {
                reason: "size must be greater than zero",
            }
        );
        self.free_block(size, offset)?;
        match self.allocate_block(new_size) {
            Ok(new_offset) => {
                log::trace!(
                    "FreeList::reallocate_block({size:#x}, {new_size:#x}, {offset:#x}): \
                     {new_offset:#x}"
                );
                Ok(new_offset)
            }
            Err(err) => {
                // Carving the block back out only undoes the merge done by
                // `free_block`, so it never needs more slots than before.
                if let Err(restore_err) = self.reserve_range(offset, size) {
                    unreachable!("failed to restore block {offset:#x}: {restore_err}");
                }
                Err(err)
            }
        }
    }

    /// Grows the tracked space to `new_size` bytes.
    ///
    /// The nodes are moved into `new_storage`, which must have a capacity of
    /// at least
    /// [`required_capacity_for_resize(new_size)`](Self::required_capacity_for_resize).
    /// The new tail `total_size..new_size` becomes free. Returns the old node
    /// storage so that the caller can release it. On failure `new_storage` is
    /// dropped and the list is unchanged.
    pub fn resize(
        &mut self,
        new_storage: Vec<NodeSlot>,
        new_size: u64,
    ) -> Result<Vec<NodeSlot>, FreeListError> {
        ensure!(
            new_size > self.total_size,
            InvalidArgumentSnafu {
                reason: "new size must be greater than the current size",
            }
        );
        let capacity = self.required_capacity_for_resize(new_size);
        ensure!(
            new_storage.capacity() >= capacity,
            InvalidArgumentSnafu {
                reason: "node storage is smaller than the required capacity",
            }
        );

        let old_size = self.total_size;
        let mut nodes = NodeArena::new(new_storage, capacity);
        let mut head = None;
        let mut last: Option<NodeIndex> = None;
        for range in self.iter() {
            let Some(index) = nodes.insert(FreeRange {
                offset: range.start,
                size: range.end - range.start,
                next: None,
            }) else {
                return CapacityExceededSnafu { max_nodes: capacity }.fail();
            };
            match last {
                Some(last) => nodes.get_mut(last).next = Some(index),
                None => head = Some(index),
            }
            last = Some(index);
        }

        let tail_size = new_size - old_size;
        match last {
            Some(last) if nodes.get(last).end() == old_size => {
                nodes.get_mut(last).size += tail_size;
            }
            _ => {
                let Some(index) = nodes.insert(FreeRange {
                    offset: old_size,
                    size: tail_size,
                    next: None,
                }) else {
                    log::warn!("FreeList::resize({new_size:#x}): no node slot for the new tail");
                    return CapacityExceededSnafu { max_nodes: capacity }.fail();
                };
                match last {
                    Some(last) => nodes.get_mut(last).next = Some(index),
                    None => head = Some(index),
                }
            }
        }

        let old_nodes = mem::replace(&mut self.nodes, nodes);
        self.head = head;
        self.total_size = new_size;
        log::debug!(
            "FreeList::resize({new_size:#x}): grown from {old_size:#x}, {} node slots",
            self.nodes.capacity()
        );
        Ok(old_nodes.into_storage())
    }

    /// Marks the whole space free again.
    ///
    /// Offsets handed out before the call must no longer be used.
    ///
    /// # Panics
    ///
    /// Panics if the node arena has no slots. Arenas built by
    /// [`new`](Self::new) and [`resize`](Self::resize) always have at least
    /// one.
    pub fn clear(&mut self) {
        self.nodes.reset();
        self.head = self.nodes.insert(FreeRange {
            offset: 0,
            size: self.total_size,
            next: None,
        });
        assert!(self.head.is_some(), "Node arena must have at least one slot");
        log::debug!("FreeList::clear(): {:#x} bytes free", self.total_size);
    }

    /// Consumes the list and returns its node storage.
    #[must_use]
    pub fn into_storage(self) -> Vec<NodeSlot> {
        self.nodes.into_storage()
    }

    /// Finds the lowest range that can hold the block.
    ///
    /// A block placed strictly inside a range splits it in two. While the
    /// arena is full such ranges are passed over in favour of one where the
    /// block starts at the range offset.
    fn find_first_fit(&self, size: u64, align: u64, bias: u64) -> Search {
        let arena_full = self.nodes.occupied() == self.nodes.capacity();
        let mut blocked = false;
        let mut prev = None;
        let mut current = self.head;
        while let Some(index) = current {
            let node = self.nodes.get(index);
            if let Some(offset) = Self::fit_in(node, size, align, bias) {
                let splits = offset != node.offset && offset + size < node.end();
                if !(splits && arena_full) {
                    return Search::Found(Fit {
                        prev,
                        index,
                        offset,
                    });
                }
                blocked = true;
            }
            prev = current;
            current = node.next;
        }
        if blocked {
            Search::ArenaFull
        } else {
            Search::NoRange
        }
    }

    /// Returns the lowest offset inside `node` where an aligned block of
    /// `size` bytes fits.
    fn fit_in(node: &FreeRange, size: u64, align: u64, bias: u64) -> Option<u64> {
        let misalign = bias.wrapping_add(node.offset) & (align - 1);
        let padding = if misalign == 0 { 0 } else { align - misalign };
        let alloc_end = node.offset.checked_add(padding)?.checked_add(size)?;
        (alloc_end <= node.end()).then_some(node.offset + padding)
    }

    /// Takes the free range `offset..offset + size` out of the list.
    ///
    /// The range must lie entirely inside a single free range.
    fn reserve_range(&mut self, offset: u64, size: u64) -> Result<(), FreeListError> {
        let end = offset + size;
        let mut prev = None;
        let mut current = self.head;
        while let Some(index) = current {
            let node = *self.nodes.get(index);
            if node.offset <= offset && end <= node.end() {
                match (node.offset == offset, node.end() == end) {
                    (true, true) => self.unlink(prev, index),
                    (true, false) => {
                        let node = self.nodes.get_mut(index);
                        node.offset = end;
                        node.size -= size;
                    }
                    (false, true) => self.nodes.get_mut(index).size -= size,
                    (false, false) => {
                        let Some(tail) = self.nodes.insert(FreeRange {
                            offset: end,
                            size: node.end() - end,
                            next: node.next,
                        }) else {
                            return self.capacity_exceeded();
                        };
                        let node = self.nodes.get_mut(index);
                        node.size = offset - node.offset;
                        node.next = Some(tail);
                    }
                }
                return Ok(());
            }
            prev = current;
            current = node.next;
        }
        InvalidArgumentSnafu {
            reason: "range is not free",
        }
        .fail()
    }

    /// Removes the node at `index`, whose predecessor is `prev`, from the
    /// chain and vacates its slot.
    fn unlink(&mut self, prev: Option<NodeIndex>, index: NodeIndex) {
        let removed = self.nodes.remove(index);
        match prev {
            Some(prev) => self.nodes.get_mut(prev).next = removed.next,
            None => self.head = removed.next,
        }
    }

    /// Links the node at `index` into the chain right after `prev`, or at
    /// the head if `prev` is `None`. The node's own `next` must already be
    /// set.
    fn link_after(&mut self, prev: Option<NodeIndex>, index: NodeIndex) {
        match prev {
            Some(prev) => self.nodes.get_mut(prev).next = Some(index),
            None => self.head = Some(index),
        }
    }

    fn capacity_exceeded<T>(&self) -> Result<T, FreeListError> {
        let max_nodes = self.nodes.capacity();
        log::warn!("FreeList: all {max_nodes} node slots are in use");
        CapacityExceededSnafu { max_nodes }.fail()
    }
}

impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("total_size", &self.total_size)
            .field("max_nodes", &self.nodes.capacity())
            .field("free", &DebugRanges(self))
            .finish()
    }
}

struct DebugRanges<'a>(&'a FreeList);

impl fmt::Debug for DebugRanges<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a FreeList {
    type Item = Range<u64>;
    type IntoIter = FreeRanges<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the free ranges of a [`FreeList`].
///
/// This struct is created by [`FreeList::iter`].
pub struct FreeRanges<'a> {
    nodes: &'a NodeArena,
    current: Option<NodeIndex>,
    remaining: usize,
}

impl Iterator for FreeRanges<'_> {
    type Item = Range<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.get(self.current?);
        self.current = node.next;
        self.remaining -= 1;
        Some(node.offset..node.end())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for FreeRanges<'_> {}
impl FusedIterator for FreeRanges<'_> {}
