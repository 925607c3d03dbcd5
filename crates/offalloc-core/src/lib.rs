//! # offalloc-core
//!
//! Offset allocator for a fixed-size linear range (a GPU heap, a file region,
//! a virtual arena). The allocator never touches the managed bytes; it hands
//! out `(offset, handle)` reservations and coalesces them back on free.
//!
//! Layout:
//! - [`small_float`]: size-class codec (3-bit mantissa floats).
//! - [`bins`]: two-level bitmap over 256 size classes.
//! - [`allocator`]: node pool, allocate/free/reset and diagnostics.
//! - [`config`], [`log`], [`error`]: ambient configuration, lifecycle
//!   records and error types.
//! - [`shared`]: a mutex wrapper for callers that need to share one allocator.
//!
//! The allocator is single threaded. Callers serialize access themselves or
//! go through [`SharedAllocator`].

#![deny(unsafe_code)]

pub mod allocator;
pub mod bins;
pub mod config;
pub mod error;
pub mod log;
pub mod report;
pub mod shared;
pub mod small_float;

pub use allocator::{Allocation, Allocator, NodeHandle, Region, Regions};
pub use config::{AllocatorConfig, DEFAULT_MAX_ALLOCATIONS, HandleValidation};
pub use error::{AllocError, ConfigError, Exhaustion, HandleError, IntegrityError};
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use report::{FreeRegion, StorageReport, StorageReportFull};
pub use shared::SharedAllocator;
