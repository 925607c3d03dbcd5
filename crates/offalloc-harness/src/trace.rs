//! Workload traces.
//!
//! A trace names allocations by caller-chosen ids so it can be replayed
//! against any allocator without knowing the handles it will produce:
//!
//! ```json
//! { "capacity": 65536, "max_allocations": 256,
//!   "ops": [ {"op": "alloc", "id": 0, "size": 64}, {"op": "free", "id": 0} ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// One replayable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    Alloc { id: u64, size: u32 },
    Free { id: u64 },
    Reset,
}

/// Allocator parameters plus the operations to run against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub capacity: u32,
    pub max_allocations: u32,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Parameters for [`synthesize_trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthOptions {
    pub seed: u64,
    pub steps: usize,
    pub capacity: u32,
    pub max_allocations: u32,
    /// Largest size requested; sizes are drawn from `1..=max_size`.
    pub max_size: u32,
    /// Percentage of steps that free a live allocation when one exists.
    pub free_percent: u8,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            seed: 0xDEAD_BEEF,
            steps: 1024,
            capacity: 1 << 20,
            max_allocations: 4096,
            max_size: 4096,
            free_percent: 40,
        }
    }
}

fn lcg(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    *state
}

/// Generates a reproducible mixed alloc/free trace.
///
/// The trace only frees ids it allocated earlier. Whether an `alloc` step
/// succeeds at replay time is up to the allocator, so frees pick from every
/// id issued so far that has not been freed yet.
#[must_use]
pub fn synthesize_trace(options: SynthOptions) -> Trace {
    let mut rng = options.seed;
    let mut next_id = 0u64;
    let mut outstanding: Vec<u64> = Vec::new();
    let mut ops = Vec::with_capacity(options.steps);
    let max_size = options.max_size.max(1);

    for _ in 0..options.steps {
        let r = lcg(&mut rng);
        let wants_free = (r >> 56) % 100 < u64::from(options.free_percent);
        if wants_free && !outstanding.is_empty() {
            let idx = ((r >> 8) % outstanding.len() as u64) as usize;
            ops.push(TraceOp::Free {
                id: outstanding.swap_remove(idx),
            });
        } else {
            let size = ((r >> 24) % u64::from(max_size)) as u32 + 1;
            ops.push(TraceOp::Alloc { id: next_id, size });
            outstanding.push(next_id);
            next_id += 1;
        }
    }

    Trace {
        capacity: options.capacity,
        max_allocations: options.max_allocations,
        ops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ops_use_tagged_json() {
        let json = serde_json::to_string(&TraceOp::Alloc { id: 3, size: 64 }).unwrap();
        assert_eq!(json, r#"{"op":"alloc","id":3,"size":64}"#);
        let op: TraceOp = serde_json::from_str(r#"{"op":"reset"}"#).unwrap();
        assert_eq!(op, TraceOp::Reset);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let options = SynthOptions {
            steps: 200,
            ..SynthOptions::default()
        };
        assert_eq!(synthesize_trace(options), synthesize_trace(options));
        let other = synthesize_trace(SynthOptions { seed: 1, ..options });
        assert_ne!(synthesize_trace(options).ops, other.ops);
    }

    #[test]
    fn synthesized_frees_follow_their_allocs() {
        let trace = synthesize_trace(SynthOptions {
            steps: 500,
            free_percent: 60,
            ..SynthOptions::default()
        });
        let mut live = std::collections::HashSet::new();
        for op in &trace.ops {
            match *op {
                TraceOp::Alloc { id, size } => {
                    assert!(size >= 1 && size <= 4096);
                    assert!(live.insert(id));
                }
                TraceOp::Free { id } => assert!(live.remove(&id)),
                TraceOp::Reset => unreachable!(),
            }
        }
    }
}
