//! Error types for allocation, handle validation, integrity audits and
//! configuration.

use thiserror::Error;

/// Which resource ran out when an allocation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exhaustion {
    /// Every node descriptor is in use.
    NodePool,
    /// No free region of a large enough class exists.
    Bytes,
}

impl std::fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodePool => f.write_str("node pool exhausted"),
            Self::Bytes => f.write_str("no free region large enough"),
        }
    }
}

/// Failure of [`Allocator::allocate`](crate::Allocator::allocate).
///
/// A failed allocation leaves the allocator unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("zero-sized allocation request")]
    ZeroSize,
    #[error("out of space: {0}")]
    OutOfSpace(Exhaustion),
}

impl AllocError {
    /// True for both kinds of capacity exhaustion.
    #[must_use]
    pub const fn is_out_of_space(&self) -> bool {
        matches!(self, Self::OutOfSpace(_))
    }
}

/// A handle presented to `free` or `allocation_size` that does not name a
/// live allocation of this allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("handle belongs to allocator pool {found}, not {expected}")]
    ForeignPool { expected: u32, found: u32 },
    #[error("node index {index} outside pool of {max} nodes")]
    IndexOutOfRange { index: u32, max: u32 },
    #[error("node {index} is not a live allocation")]
    NotAllocated { index: u32 },
    #[error("stale handle for node {index}: generation {found}, current {current}")]
    StaleGeneration {
        index: u32,
        found: u32,
        current: u32,
    },
    #[error("offset {found} does not match node {index} at offset {actual}")]
    OffsetMismatch { index: u32, found: u32, actual: u32 },
}

/// A broken structural invariant found by
/// [`Allocator::verify_integrity`](crate::Allocator::verify_integrity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("no node covers the managed range")]
    NoNodes,
    #[error("region walk starts at offset {offset}, expected 0")]
    MisalignedStart { offset: u32 },
    #[error("node {index} starts at {offset}, expected {expected}")]
    Discontiguous {
        index: u32,
        offset: u32,
        expected: u32,
    },
    #[error("regions cover {covered} bytes of {capacity}")]
    CoverageMismatch { covered: u64, capacity: u32 },
    #[error("node {index} neighbor link is not mirrored by node {neighbor}")]
    BrokenNeighborLink { index: u32, neighbor: u32 },
    #[error("adjacent nodes {left} and {right} are both free")]
    UncoalescedNeighbors { left: u32, right: u32 },
    #[error("free node {index} missing from bin {bin}")]
    NodeNotInBin { index: u32, bin: u32 },
    #[error("node {index} does not belong in the free list of bin {bin}")]
    StrayBinEntry { index: u32, bin: u32 },
    #[error("bin {bin} bitmap bit disagrees with its free list")]
    BitmapMismatch { bin: u32 },
    #[error("top bitmap disagrees with leaf word {top}")]
    TopBitmapMismatch { top: u32 },
    #[error("free storage counter {counted} differs from summed free bytes {summed}")]
    FreeStorageDrift { counted: u32, summed: u64 },
    #[error("{vacant} vacant + {reachable} reachable nodes != pool of {max}")]
    NodeAccounting { vacant: u32, reachable: u32, max: u32 },
}

/// Rejected allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_allocations must be at least 1")]
    ZeroMaxAllocations,
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}
