//! Errors reported by [`FreeList`](crate::FreeList) and
//! [`DynamicAllocator`](crate::DynamicAllocator).

use snafu::{Location, Snafu};

/// Errors that can occur while allocating or freeing ranges.
///
/// Every operation that returns one of these errors leaves the allocator in
/// the state it had before the call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FreeListError {
    /// A zero size, a misaligned request, or a range outside the tracked
    /// space.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free range is large enough for the request.
    #[snafu(display("no free range can hold {size} bytes ({free_space} bytes free)"))]
    OutOfSpace {
        size: u64,
        free_space: u64,
        #[snafu(implicit)]
        location: Location,
    },
    /// The freed range overlaps space that is already free.
    #[snafu(display(
        "block {offset:#x}..{end:#x} overlaps free space (double free?)",
        end = offset.saturating_add(*size)
    ))]
    InvalidFree {
        offset: u64,
        size: u64,
        #[snafu(implicit)]
        location: Location,
    },
    /// The node arena has no vacant slot for a new fragment.
    #[snafu(display("node arena is full ({max_nodes} nodes)"))]
    CapacityExceeded {
        max_nodes: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Fieldless discriminant of [`FreeListError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    OutOfSpace,
    InvalidFree,
    CapacityExceeded,
}

impl FreeListError {
    /// Returns the class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::OutOfSpace { .. } => ErrorKind::OutOfSpace,
            Self::InvalidFree { .. } => ErrorKind::InvalidFree,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
        }
    }
}
