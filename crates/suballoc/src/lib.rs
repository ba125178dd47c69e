//! Free-list sub-allocation inside a pre-reserved block of memory.
//!
//! This crate tracks free and used byte ranges inside one block that was
//! reserved up front (a CPU buffer, a GPU vertex or index buffer, ...) and
//! services arbitrary-size allocate/free requests against it without calling
//! a general-purpose allocator per request.
//!
//! # Components
//!
//! ## [`FreeList`]
//!
//! Tracks free ranges of an abstract address space `0..total_size` by
//! offset. First-fit allocation, eager coalescing on free, growth by
//! [`resize`](FreeList::resize). Nodes live in a fixed-capacity arena whose
//! storage the caller provides.
//!
//! **Performance**: O(n) allocation and deallocation where n is the number of
//! free ranges.
//!
//! ## [`DynamicAllocator`]
//!
//! Wraps a [`FreeList`] around a borrowed payload slice and hands out
//! pointers instead of offsets.
//!
//! # Two-Phase Construction
//!
//! Neither type allocates on its own. The caller first asks how much node
//! storage is needed, allocates it however it likes, and hands it over:
//!
//! ```rust
//! use suballoc::{FreeList, FreeListConfig};
//!
//! let config = FreeListConfig::with_granularity(256);
//! let capacity = FreeList::required_capacity(64 * 1024, &config);
//! let mut list = FreeList::new(64 * 1024, config, Vec::with_capacity(capacity)).unwrap();
//!
//! let offset = list.allocate_block(1024).unwrap();
//! list.free_block(1024, offset).unwrap();
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns a [`FreeListError`]. A failed operation
//! leaves the allocator exactly as it was. Failures are also reported through
//! the [`log`] facade.
//!
//! # Thread Safety
//!
//! Both types are `Send` but not `Sync`. Wrap them in a lock to share them:
//!
//! ```rust,ignore
//! use spin::Mutex;
//! use suballoc::FreeList;
//!
//! struct VertexBuffer {
//!     ranges: Mutex<FreeList>,
//! }
//!
//! impl VertexBuffer {
//!     fn allocate(&self, size: u64) -> Option<u64> {
//!         self.ranges.lock().allocate_block(size).ok()
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    config::FreeListConfig,
    dynamic::DynamicAllocator,
    error::{ErrorKind, FreeListError},
    free_list::{FreeList, FreeRanges, NodeSlot},
};

mod config;
pub mod dynamic;
pub mod error;
pub mod free_list;
