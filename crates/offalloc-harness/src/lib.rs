//! Replay harness for offalloc.
//!
//! This crate provides:
//! - Traces: JSON workload descriptions and a deterministic generator
//! - Replay: run a trace against an allocator and summarize the outcome
//! - Structured logs: JSONL records of each replayed step

#![forbid(unsafe_code)]

pub mod error;
pub mod runner;
pub mod structured_log;
pub mod trace;

pub use error::HarnessError;
pub use runner::{ReplayOptions, ReplayReport, replay};
pub use trace::{SynthOptions, Trace, TraceOp, synthesize_trace};
