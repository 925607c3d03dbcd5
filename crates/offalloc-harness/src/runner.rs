//! Trace replay.
//!
//! [`replay`] drives an [`Allocator`] through a [`Trace`], mapping trace ids
//! to live allocations, and returns a serializable [`ReplayReport`].

use std::collections::{HashMap, HashSet};
use std::io::Write;

use serde::Serialize;
use serde_json::json;

use offalloc_core::{
    AllocError, Allocation, Allocator, AllocatorConfig, Exhaustion, FreeRegion, HandleValidation,
    StorageReport,
};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::trace::{Trace, TraceOp};

/// Knobs for a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOptions {
    /// Run a full integrity audit after every step instead of only at the end.
    pub verify_each_step: bool,
    pub validation: HandleValidation,
    /// Include the per-class free region histogram in the report.
    pub include_histogram: bool,
}

/// Summary of a replay run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub capacity: u32,
    pub max_allocations: u32,
    pub steps: usize,
    pub allocs_ok: u64,
    pub allocs_zero_size: u64,
    pub allocs_out_of_nodes: u64,
    pub allocs_out_of_space: u64,
    pub frees: u64,
    /// Frees of ids whose allocation failed or was discarded by a reset.
    pub skipped_frees: u64,
    pub resets: u64,
    pub peak_live_allocations: usize,
    pub peak_used_bytes: u64,
    pub final_live_allocations: u32,
    pub final_report: StorageReport,
    /// `1000 - 1000 * largest / total` over free space; 0 when nothing is free.
    pub fragmentation_permille: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<Vec<FreeRegion>>,
}

impl ReplayReport {
    fn new(trace: &Trace) -> Self {
        Self {
            capacity: trace.capacity,
            max_allocations: trace.max_allocations,
            steps: trace.ops.len(),
            allocs_ok: 0,
            allocs_zero_size: 0,
            allocs_out_of_nodes: 0,
            allocs_out_of_space: 0,
            frees: 0,
            skipped_frees: 0,
            resets: 0,
            peak_live_allocations: 0,
            peak_used_bytes: 0,
            final_live_allocations: 0,
            final_report: StorageReport::default(),
            fragmentation_permille: 0,
            histogram: None,
        }
    }

    /// Failed allocations of any cause.
    #[must_use]
    pub const fn allocs_failed(&self) -> u64 {
        self.allocs_zero_size + self.allocs_out_of_nodes + self.allocs_out_of_space
    }
}

fn fragmentation_permille(report: StorageReport) -> u32 {
    if report.total_free_space == 0 {
        return 0;
    }
    let largest = u64::from(report.largest_free_region).min(u64::from(report.total_free_space));
    let ratio = largest * 1000 / u64::from(report.total_free_space);
    1000 - ratio as u32
}

/// Replays `trace` without logging.
pub fn replay(trace: &Trace, options: &ReplayOptions) -> Result<ReplayReport, HarnessError> {
    replay_with_log(trace, options, &mut LogEmitter::disabled())
}

/// Replays `trace`, emitting one JSONL entry per step to `log`.
///
/// Trace errors (freeing an id that was never issued, reusing a live id) and
/// allocator rejections abort the run; allocation failures are counted.
pub fn replay_with_log<W: Write>(
    trace: &Trace,
    options: &ReplayOptions,
    log: &mut LogEmitter<W>,
) -> Result<ReplayReport, HarnessError> {
    let config = AllocatorConfig::new(trace.capacity, trace.max_allocations)
        .with_validation(options.validation);
    let mut allocator = Allocator::with_config(config)?;
    let mut live: HashMap<u64, (Allocation, u32)> = HashMap::new();
    let mut discarded: HashSet<u64> = HashSet::new();
    let mut used_bytes = 0u64;
    let mut report = ReplayReport::new(trace);

    log.emit_entry(
        LogEntry::new(LogLevel::Info, "replay_start").with_details(json!({
            "capacity": trace.capacity,
            "max_allocations": trace.max_allocations,
            "steps": trace.ops.len(),
        })),
    )?;

    for (step, op) in trace.ops.iter().enumerate() {
        match *op {
            TraceOp::Alloc { id, size } => {
                if live.contains_key(&id) {
                    return Err(HarnessError::DuplicateId { step, id });
                }
                let entry = LogEntry::new(LogLevel::Trace, "alloc")
                    .with_step(step)
                    .with_id(id)
                    .with_size(size);
                match allocator.allocate(size) {
                    Ok(allocation) => {
                        live.insert(id, (allocation, size));
                        discarded.remove(&id);
                        used_bytes += u64::from(size);
                        report.allocs_ok += 1;
                        log.emit_entry(
                            entry
                                .with_offset(allocation.offset)
                                .with_outcome(Outcome::Success),
                        )?;
                    }
                    Err(err) => {
                        discarded.insert(id);
                        match err {
                            AllocError::ZeroSize => report.allocs_zero_size += 1,
                            AllocError::OutOfSpace(Exhaustion::NodePool) => {
                                report.allocs_out_of_nodes += 1;
                            }
                            AllocError::OutOfSpace(Exhaustion::Bytes) => {
                                report.allocs_out_of_space += 1;
                            }
                        }
                        let mut entry = entry
                            .with_outcome(Outcome::Denied)
                            .with_details(json!({ "error": err.to_string() }));
                        entry.level = LogLevel::Info;
                        log.emit_entry(entry)?;
                    }
                }
            }
            TraceOp::Free { id } => {
                let entry = LogEntry::new(LogLevel::Trace, "free")
                    .with_step(step)
                    .with_id(id);
                if let Some((allocation, size)) = live.remove(&id) {
                    allocator
                        .free(allocation)
                        .map_err(|source| HarnessError::FreeRejected { step, id, source })?;
                    used_bytes -= u64::from(size);
                    report.frees += 1;
                    log.emit_entry(
                        entry
                            .with_offset(allocation.offset)
                            .with_size(size)
                            .with_outcome(Outcome::Success),
                    )?;
                } else if discarded.remove(&id) {
                    report.skipped_frees += 1;
                    let mut entry = entry.with_outcome(Outcome::Skipped);
                    entry.level = LogLevel::Debug;
                    log.emit_entry(entry)?;
                } else {
                    return Err(HarnessError::UnknownId { step, id });
                }
            }
            TraceOp::Reset => {
                allocator.reset();
                discarded.extend(live.drain().map(|(id, _)| id));
                used_bytes = 0;
                report.resets += 1;
                log.emit_entry(
                    LogEntry::new(LogLevel::Debug, "reset")
                        .with_step(step)
                        .with_outcome(Outcome::Success),
                )?;
            }
        }

        report.peak_live_allocations = report.peak_live_allocations.max(live.len());
        report.peak_used_bytes = report.peak_used_bytes.max(used_bytes);

        if options.verify_each_step {
            allocator
                .verify_integrity()
                .map_err(|source| HarnessError::Integrity { step, source })?;
        }
    }

    allocator
        .verify_integrity()
        .map_err(|source| HarnessError::Integrity {
            step: trace.ops.len(),
            source,
        })?;

    report.final_live_allocations = allocator.live_allocations();
    report.final_report = allocator.storage_report();
    report.fragmentation_permille = fragmentation_permille(report.final_report);
    if options.include_histogram {
        report.histogram = Some(
            allocator
                .storage_report_full()
                .non_empty()
                .copied()
                .collect(),
        );
    }

    log.emit_entry(
        LogEntry::new(LogLevel::Info, "replay_done").with_details(json!({
            "allocs_ok": report.allocs_ok,
            "allocs_failed": report.allocs_failed(),
            "frees": report.frees,
            "total_free_space": report.final_report.total_free_space,
            "largest_free_region": report.final_report.largest_free_region,
        })),
    )?;
    log.flush()?;

    Ok(report)
}
