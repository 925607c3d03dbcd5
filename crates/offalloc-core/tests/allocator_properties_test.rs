use offalloc_core::small_float::{
    MANTISSA_VALUE, class_index_round_down, class_index_round_up, class_index_to_size,
};
use offalloc_core::{AllocError, Allocation, Allocator, Exhaustion};

fn lcg(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn assert_partition(allocator: &Allocator) {
    let mut expected = 0u64;
    for region in allocator.regions() {
        assert_eq!(u64::from(region.offset), expected, "gap or overlap");
        expected += u64::from(region.size);
    }
    assert_eq!(expected, u64::from(allocator.capacity()));
}

fn largest_free_node(allocator: &Allocator) -> u32 {
    allocator
        .regions()
        .filter(|r| !r.used)
        .map(|r| r.size)
        .max()
        .unwrap_or(0)
}

#[test]
fn partition_holds_under_deterministic_trace() {
    let mut allocator = Allocator::new(1 << 22, 2048);
    let mut live: Vec<(Allocation, u32)> = Vec::new();
    let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;

    for step in 0..4000 {
        let r = lcg(&mut rng);
        if r % 5 < 3 {
            let size = ((r >> 16) % 20_000) as u32 + 1;
            if let Ok(a) = allocator.allocate(size) {
                live.push((a, size));
            }
        } else if !live.is_empty() {
            let idx = (r >> 8) as usize % live.len();
            let (a, _) = live.swap_remove(idx);
            allocator.free(a).unwrap();
        }

        if step % 97 == 0 {
            allocator.verify_integrity().unwrap();
        }
        assert_partition(&allocator);
        let used: u64 = live.iter().map(|(_, s)| u64::from(*s)).sum();
        assert_eq!(
            u64::from(allocator.free_storage()) + used,
            u64::from(allocator.capacity())
        );
        assert_eq!(allocator.live_allocations() as usize, live.len());
    }

    for (a, size) in &live {
        assert_eq!(allocator.allocation_size(a.handle), Ok(*size));
    }
    for (a, _) in live {
        allocator.free(a).unwrap();
    }
    allocator.verify_integrity().unwrap();
    assert_eq!(allocator.regions().count(), 1);
    assert_eq!(allocator.free_storage(), 1 << 22);
}

#[test]
fn allocations_never_overlap() {
    let mut allocator = Allocator::new(1 << 16, 1024);
    let mut live: Vec<Allocation> = Vec::new();
    let mut rng = 7u64;
    for _ in 0..2000 {
        let r = lcg(&mut rng);
        if r % 3 != 0 || live.is_empty() {
            if let Ok(a) = allocator.allocate((r >> 20) as u32 % 700 + 1) {
                live.push(a);
            }
        } else {
            let a = live.swap_remove((r >> 8) as usize % live.len());
            allocator.free(a).unwrap();
        }
    }
    let mut spans: Vec<(u32, u32)> = live
        .iter()
        .map(|a| (a.offset, a.offset + allocator.allocation_size(a.handle).unwrap()))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
}

#[test]
fn round_trip_precision_bounds() {
    let mut rng = 0x1234_5678u64;
    for _ in 0..100_000 {
        let x = (lcg(&mut rng) >> 33) as u32 % ((1 << 31) - 1) + 1;
        let down = class_index_to_size(class_index_round_down(x));
        let up = class_index_to_size(class_index_round_up(x));
        assert!(down <= x && x <= up, "{down} <= {x} <= {up}");
        assert!(u64::from(up - x) * u64::from(MANTISSA_VALUE) < u64::from(x));
    }
}

#[test]
fn no_false_out_of_space() {
    let mut allocator = Allocator::new(1 << 20, 4096);
    let mut live = Vec::new();
    let mut rng = 99u64;
    for _ in 0..3000 {
        let r = lcg(&mut rng);
        let size = (r >> 24) as u32 % 5000 + 1;
        // Any free node at least as large as the rounded-up class must be
        // found by the bitmap search.
        let fits = allocator.free_node_slots() > 0
            && largest_free_node(&allocator) >= class_index_to_size(class_index_round_up(size));
        match allocator.allocate(size) {
            Ok(a) => live.push(a),
            Err(err) => {
                assert!(!fits, "missed a fitting block for {size}: {err}");
                assert_eq!(err, AllocError::OutOfSpace(Exhaustion::Bytes));
            }
        }
        if r % 4 == 0 && !live.is_empty() {
            let a = live.swap_remove((r >> 4) as usize % live.len());
            allocator.free(a).unwrap();
        }
    }
}

#[test]
fn free_allocate_round_trip_restores_free_total() {
    let mut allocator = Allocator::new(10_000, 64);
    let _pin = allocator.allocate(123).unwrap();
    let before = allocator.storage_report().total_free_space;
    let a = allocator.allocate(500).unwrap();
    allocator.free(a).unwrap();
    let b = allocator.allocate(500).unwrap();
    allocator.free(b).unwrap();
    assert_eq!(allocator.storage_report().total_free_space, before);
}

#[test]
fn coalescing_in_every_order() {
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let mut allocator = Allocator::new(40, 8);
        let blocks = [
            allocator.allocate(10).unwrap(),
            allocator.allocate(20).unwrap(),
            allocator.allocate(10).unwrap(),
        ];
        assert_eq!(blocks.map(|b| b.offset), [0, 10, 30]);
        assert_eq!(allocator.free_storage(), 0);
        for i in order {
            allocator.free(blocks[i]).unwrap();
            allocator.verify_integrity().unwrap();
        }
        assert_eq!(allocator.storage_report().largest_free_region, 40, "{order:?}");
        assert_eq!(allocator.allocate(40).unwrap().offset, 0);
    }
}

#[test]
fn fragmentation_boundary() {
    let mut allocator = Allocator::new(100, 8);
    allocator.allocate(40).unwrap();
    allocator.allocate(40).unwrap();
    assert_eq!(allocator.storage_report().total_free_space, 20);
    assert_eq!(
        allocator.allocate(21),
        Err(AllocError::OutOfSpace(Exhaustion::Bytes))
    );
    let last = allocator.allocate(20).unwrap();
    assert_eq!(last.offset, 80);
    assert_eq!(allocator.storage_report().total_free_space, 0);
}

#[test]
fn non_contiguous_free_space_is_not_served() {
    let mut allocator = Allocator::new(100, 8);
    let a = allocator.allocate(30).unwrap();
    let _b = allocator.allocate(20).unwrap();
    let _c = allocator.allocate(30).unwrap();
    allocator.free(a).unwrap();
    // 30 + 20 free bytes, but in two separate holes.
    assert_eq!(allocator.storage_report().total_free_space, 50);
    assert_eq!(
        allocator.allocate(40),
        Err(AllocError::OutOfSpace(Exhaustion::Bytes))
    );
    assert!(allocator.allocate(30).is_ok());
}

#[test]
fn node_slot_exhaustion_is_distinct_from_byte_exhaustion() {
    let mut allocator = Allocator::new(1000, 2);
    allocator.allocate(100).unwrap();
    assert!(allocator.storage_report().total_free_space > 0);
    assert_eq!(
        allocator.allocate(1),
        Err(AllocError::OutOfSpace(Exhaustion::NodePool))
    );

    let mut allocator = Allocator::new(1000, 3);
    let _a = allocator.allocate(100).unwrap();
    let b = allocator.allocate(100).unwrap();
    assert_eq!(
        allocator.allocate(100),
        Err(AllocError::OutOfSpace(Exhaustion::NodePool))
    );
    // Freeing b merges it into the tail, which hands a node back.
    allocator.free(b).unwrap();
    assert_eq!(allocator.free_node_slots(), 1);
    assert_eq!(allocator.allocate(100).unwrap().offset, 100);
}

#[test]
fn failed_allocate_changes_nothing() {
    let mut allocator = Allocator::new(1000, 8);
    let _a = allocator.allocate(600).unwrap();
    let before_report = allocator.storage_report();
    let before_full = allocator.storage_report_full();
    let before_layout: Vec<_> = allocator.regions().collect();

    assert!(allocator.allocate(500).is_err());
    assert!(allocator.allocate(0).is_err());

    assert_eq!(allocator.storage_report(), before_report);
    assert_eq!(allocator.storage_report_full(), before_full);
    assert_eq!(allocator.regions().collect::<Vec<_>>(), before_layout);
}

#[test]
fn largest_free_region_is_always_servable() {
    let mut allocator = Allocator::new(1 << 18, 1024);
    let mut rng = 0xFEEDu64;
    let mut live = Vec::new();
    for _ in 0..500 {
        let r = lcg(&mut rng);
        if let Ok(a) = allocator.allocate((r >> 32) as u32 % 3000 + 1) {
            live.push(a);
        }
        if r % 3 == 0 && !live.is_empty() {
            allocator.free(live.swap_remove(0)).unwrap();
        }
    }
    let largest = allocator.storage_report().largest_free_region;
    if largest > 0 {
        let a = allocator.allocate(largest).unwrap();
        allocator.free(a).unwrap();
    }
    assert!(largest <= largest_free_node(&allocator));
}
