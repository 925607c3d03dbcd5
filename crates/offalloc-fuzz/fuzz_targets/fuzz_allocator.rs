#![no_main]
use libfuzzer_sys::fuzz_target;
use offalloc_core::{Allocator, AllocatorConfig, HandleValidation};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // Small pool so exhaustion and coalescing are both reachable.
    let capacity = u32::from(u16::from_le_bytes([data[0], data[1]])) * 16;
    let max_allocations = u32::from(data[2] % 64) + 1;
    let config =
        AllocatorConfig::new(capacity, max_allocations).with_validation(HandleValidation::Strict);
    let Ok(mut allocator) = Allocator::with_config(config) else {
        return;
    };
    let mut live = Vec::new();
    let mut freed = Vec::new();

    for chunk in data[3..].chunks(3) {
        let arg = u32::from(chunk.get(1).copied().unwrap_or(0))
            | (u32::from(chunk.get(2).copied().unwrap_or(0)) << 8);
        match chunk[0] % 8 {
            0..=3 => {
                if let Ok(allocation) = allocator.allocate(arg) {
                    assert!(u64::from(allocation.offset) + u64::from(arg) <= u64::from(capacity));
                    let size = allocator.allocation_size(allocation.handle);
                    assert!(size.is_ok_and(|s| s >= arg));
                    live.push(allocation);
                }
            }
            4 | 5 => {
                if !live.is_empty() {
                    let allocation = live.swap_remove(arg as usize % live.len());
                    assert!(allocator.free(allocation).is_ok());
                    freed.push(allocation);
                }
            }
            6 => {
                // Stale handles must be rejected without touching state.
                if let Some(&stale) = freed.last() {
                    assert!(allocator.free(stale).is_err());
                }
            }
            _ => {
                if arg % 16 == 0 {
                    allocator.reset();
                    freed.append(&mut live);
                }
            }
        }
        assert!(allocator.verify_integrity().is_ok());
        let report = allocator.storage_report();
        assert!(report.largest_free_region <= report.total_free_space);
    }
});
