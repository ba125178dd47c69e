//! Pointer-based allocator over a borrowed payload block.
//!
//! [`DynamicAllocator`] pairs a [`FreeList`] with a byte slice and translates
//! between offsets and pointers. The slice is the payload; the node storage
//! of the free list is separate and may live anywhere, so small bookkeeping
//! can stay in host memory while the payload is, for example, a mapped GPU
//! buffer.
//!
//! # Usage Example
//!
//! ```rust
//! use suballoc::{DynamicAllocator, FreeListConfig};
//!
//! let mut payload = vec![0u8; 4096];
//! let config = FreeListConfig::default();
//! let storage = Vec::with_capacity(DynamicAllocator::required_capacity(4096, &config));
//! let mut allocator = DynamicAllocator::new(&mut payload, config, storage).unwrap();
//!
//! let block = allocator.allocate(64).unwrap();
//! unsafe {
//!     block.as_ptr().write_bytes(0xab, 64);
//! }
//! allocator.free(block, 64).unwrap();
//! assert_eq!(allocator.free_space(), 4096);
//! ```

use alloc::vec::Vec;
use core::{fmt, marker::PhantomData, ptr::NonNull, slice};

use crate::{
    FreeList, FreeListConfig, NodeSlot,
    error::{FreeListError, InvalidArgumentSnafu},
};

/// Hands out pointers into a borrowed payload block.
///
/// The payload stays borrowed for `'a`, so it outlives the allocator. Blocks
/// are returned as raw pointers; reading and writing them is up to the
/// caller, the allocator itself never touches the payload except to move
/// block contents in [`reallocate`](Self::reallocate).
///
/// # Thread Safety
///
/// This allocator is `Send` but not `Sync`. It can be moved between threads
/// but requires external synchronization for concurrent access.
pub struct DynamicAllocator<'a> {
    list: FreeList,
    base: NonNull<u8>,
    len: usize,
    _payload: PhantomData<&'a mut [u8]>,
}

unsafe impl Send for DynamicAllocator<'_> {}

impl<'a> DynamicAllocator<'a> {
    /// Returns the number of node slots needed for a payload of `total_size`
    /// bytes.
    #[must_use]
    pub fn required_capacity(total_size: u64, config: &FreeListConfig) -> usize {
        FreeList::required_capacity(total_size, config)
    }

    /// Returns the number of bytes of bookkeeping needed for a payload of
    /// `total_size` bytes. The payload itself is not included.
    #[must_use]
    pub fn memory_requirement(total_size: u64, config: &FreeListConfig) -> usize {
        FreeList::memory_requirement(total_size, config)
            .saturating_add(size_of::<Self>() - size_of::<FreeList>())
    }

    /// Creates an allocator over `payload`.
    ///
    /// `storage` becomes the node arena of the underlying free list, see
    /// [`FreeList::new`].
    pub fn new(
        payload: &'a mut [u8],
        config: FreeListConfig,
        storage: Vec<NodeSlot>,
    ) -> Result<Self, FreeListError> {
        let len = payload.len();
        let Ok(total_size) = u64::try_from(len) else {
            return InvalidArgumentSnafu {
                reason: "payload is too large",
            }
            .fail();
        };
        let list = FreeList::new(total_size, config, storage)?;
        Ok(Self {
            list,
            base: NonNull::from(payload).cast(),
            len,
            _payload: PhantomData,
        })
    }

    /// Returns the underlying free list.
    #[must_use]
    pub fn free_list(&self) -> &FreeList {
        &self.list
    }

    /// Returns the size of the payload in bytes.
    #[must_use]
    pub fn total_space(&self) -> u64 {
        self.list.total_size()
    }

    /// Returns the number of free payload bytes.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.list.free_space()
    }

    /// Returns the size of the largest block that can currently be
    /// allocated.
    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.list.largest_free_block()
    }

    /// Allocates `size` bytes of payload.
    pub fn allocate(&mut self, size: u64) -> Result<NonNull<u8>, FreeListError> {
        let offset = self.list.allocate_block(size)?;
        Ok(self.pointer_at(offset))
    }

    /// Allocates `size` bytes at an address that is a multiple of `align`.
    ///
    /// Free the block with [`free`](Self::free) and the same `size`.
    pub fn allocate_aligned(
        &mut self,
        size: u64,
        align: u64,
    ) -> Result<NonNull<u8>, FreeListError> {
        let Ok(bias) = u64::try_from(self.base.addr().get()) else {
            return InvalidArgumentSnafu {
                reason: "payload address does not fit in 64 bits",
            }
            .fail();
        };
        let offset = self.list.allocate_block_biased(size, align, bias)?;
        Ok(self.pointer_at(offset))
    }

    /// Returns the `size`-byte block at `block` to the allocator.
    pub fn free(&mut self, block: NonNull<u8>, size: u64) -> Result<(), FreeListError> {
        let offset = self.offset_of(block)?;
        self.list.free_block(size, offset)
    }

    /// Resizes the `size`-byte block at `block` to `new_size` bytes.
    ///
    /// The first `min(size, new_size)` bytes are moved to the new location.
    /// On failure the original block is still allocated and unchanged.
    pub fn reallocate(
        &mut self,
        block: NonNull<u8>,
        size: u64,
        new_size: u64,
    ) -> Result<NonNull<u8>, FreeListError> {
        let offset = self.offset_of(block)?;
        let new_offset = self.list.reallocate_block(size, new_size, offset)?;
        let new_block = self.pointer_at(new_offset);
        if new_offset != offset {
            let count = self.to_index(u64::min(size, new_size));
            // Both ranges lie inside the payload and may overlap.
            unsafe {
                block.copy_to(new_block, count);
            }
        }
        Ok(new_block)
    }

    /// Returns the offset of `block` from the start of the payload.
    pub fn offset_of(&self, block: NonNull<u8>) -> Result<u64, FreeListError> {
        let offset = block
            .addr()
            .get()
            .checked_sub(self.base.addr().get())
            .filter(|offset| *offset < self.len)
            .and_then(|offset| u64::try_from(offset).ok());
        let Some(offset) = offset else {
            return InvalidArgumentSnafu {
                reason: "pointer does not point into the payload",
            }
            .fail();
        };
        Ok(offset)
    }

    /// Marks the whole payload free again.
    ///
    /// Pointers handed out before the call must no longer be used.
    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Consumes the allocator and returns the payload and the node storage.
    #[must_use]
    pub fn into_parts(self) -> (&'a mut [u8], Vec<NodeSlot>) {
        // `base` and `len` came from a `&'a mut [u8]` that is still borrowed.
        let payload = unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) };
        (payload, self.list.into_storage())
    }

    fn pointer_at(&self, offset: u64) -> NonNull<u8> {
        let offset = self.to_index(offset);
        assert!(offset < self.len, "Offset must lie inside the payload");
        unsafe { self.base.add(offset) }
    }

    fn to_index(&self, value: u64) -> usize {
        match usize::try_from(value) {
            Ok(value) if value <= self.len => value,
            _ => unreachable!("{value:#x} exceeds the payload length {:#x}", self.len),
        }
    }
}

impl fmt::Debug for DynamicAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicAllocator")
            .field("base", &self.base)
            .field("list", &self.list)
            .finish()
    }
}
