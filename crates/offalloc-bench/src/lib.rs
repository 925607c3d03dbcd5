//! Shared workload builders for the offalloc benchmarks.

use offalloc_core::{Allocation, Allocator};

/// Deterministic size sequence in `1..=max_size`.
#[must_use]
pub fn size_sequence(seed: u64, len: usize, max_size: u32) -> Vec<u32> {
    let mut state = seed;
    let max_size = u64::from(max_size.max(1));
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % max_size) as u32 + 1
        })
        .collect()
}

/// Fills `allocator` with `sizes` then frees every other allocation, leaving
/// a checkerboard of holes. Returns the allocations still live.
pub fn fragment(allocator: &mut Allocator, sizes: &[u32]) -> Vec<Allocation> {
    let mut live = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let Ok(allocation) = allocator.allocate(size) else {
            break;
        };
        live.push(allocation);
    }
    let mut kept = Vec::with_capacity(live.len() / 2 + 1);
    for (i, allocation) in live.into_iter().enumerate() {
        if i % 2 == 0 {
            // Handles come straight from allocate, so free cannot reject them.
            let _ = allocator.free(allocation);
        } else {
            kept.push(allocation);
        }
    }
    kept
}
