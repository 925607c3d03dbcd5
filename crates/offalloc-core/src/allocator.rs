//! Core allocator state.
//!
//! A fixed pool of nodes describes the managed range. Every node is one
//! contiguous region, either handed out (`Used`) or sitting in the free list
//! of its size class (`Free`). Unused slots (`Vacant`) wait on a LIFO stack.
//! Nodes are linked twice: into their bin's free list while free, and into
//! the physical neighbor chain at all times, so freeing can merge with both
//! sides without searching.
//!
//! Nothing is heap-allocated after construction; handles are node indices
//! tagged with a generation and the pool id.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bins::{BinIndex, NUM_LEAF_BINS, NUM_TOP_BINS};
use crate::config::{AllocatorConfig, HandleValidation};
use crate::error::{AllocError, ConfigError, Exhaustion, HandleError, IntegrityError};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent};
use crate::report::{FreeRegion, StorageReport, StorageReportFull};
use crate::small_float;

/// Index of a node in the pool.
pub type NodeIndex = u32;

/// Source of process-unique pool ids.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum NodeState {
    #[default]
    Vacant,
    Free,
    Used,
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    data_offset: u32,
    data_size: u32,
    state: NodeState,
    /// Bumped whenever the slot leaves the vacant stack or the pool resets.
    generation: u32,
    bin_list_prev: Option<NodeIndex>,
    bin_list_next: Option<NodeIndex>,
    neighbor_prev: Option<NodeIndex>,
    neighbor_next: Option<NodeIndex>,
}

/// Opaque key of a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: NodeIndex,
    generation: u32,
    pool: u32,
}

impl NodeHandle {
    /// Node index inside the pool.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at the time the allocation was made.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Id of the allocator that issued this handle.
    #[must_use]
    pub const fn pool(self) -> u32 {
        self.pool
    }
}

/// A reservation of `size` bytes at `offset`. Present it to
/// [`Allocator::free`] to give the bytes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub offset: u32,
    pub handle: NodeHandle,
}

/// One contiguous region of the managed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Region {
    pub offset: u32,
    pub size: u32,
    pub used: bool,
}

/// Iterator over regions in offset order. See [`Allocator::regions`].
#[derive(Debug, Clone)]
pub struct Regions<'a> {
    nodes: &'a [Node],
    next: Option<NodeIndex>,
    remaining: usize,
}

impl Iterator for Regions<'_> {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        let index = self.next?;
        // Bounded by the pool size so a corrupted chain cannot loop forever.
        self.remaining = self.remaining.checked_sub(1)?;
        let node = self.nodes.get(index as usize)?;
        self.next = node.neighbor_next;
        Some(Region {
            offset: node.data_offset,
            size: node.data_size,
            used: node.state == NodeState::Used,
        })
    }
}

/// Two-level segregated-fit offset allocator.
///
/// Manages `[0, capacity)` with at most `max_allocations` nodes. Both
/// [`allocate`](Self::allocate) and [`free`](Self::free) are O(1).
pub struct Allocator {
    size: u32,
    max_allocs: u32,
    free_storage: u32,
    live_allocations: u32,
    bins: BinIndex,
    nodes: Box<[Node]>,
    /// Vacant node stack; the top is `free_nodes[free_count - 1]`.
    free_nodes: Box<[NodeIndex]>,
    free_count: u32,
    pool: u32,
    validation: HandleValidation,
    log: LifecycleLog,
}

impl Allocator {
    /// Creates an allocator over `capacity` bytes with room for
    /// `max_allocations` nodes, strict validation and logging off.
    ///
    /// `max_allocations` is raised to 1 if zero, since the initial free
    /// region needs a node. Live allocations are bounded by
    /// `max_allocations - 1`: a request is only served while a spare node
    /// exists for its remainder.
    #[must_use]
    pub fn new(capacity: u32, max_allocations: u32) -> Self {
        Self::build(AllocatorConfig::new(capacity, max_allocations.max(1)))
    }

    /// Creates an allocator with [`DEFAULT_MAX_ALLOCATIONS`] nodes.
    ///
    /// [`DEFAULT_MAX_ALLOCATIONS`]: crate::DEFAULT_MAX_ALLOCATIONS
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        Self::new(capacity, crate::DEFAULT_MAX_ALLOCATIONS)
    }

    /// Creates an allocator from a validated config.
    pub fn with_config(config: AllocatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: AllocatorConfig) -> Self {
        let max = config.max_allocations;
        let mut allocator = Self {
            size: config.capacity,
            max_allocs: max,
            free_storage: 0,
            live_allocations: 0,
            bins: BinIndex::new(),
            nodes: vec![Node::default(); max as usize].into_boxed_slice(),
            free_nodes: vec![0; max as usize].into_boxed_slice(),
            free_count: 0,
            pool: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            validation: config.validation,
            log: LifecycleLog::new(config.log_capacity, config.log_level),
        };
        allocator.rebuild();
        allocator
    }

    /// Puts the pool back to one free node spanning the whole range.
    fn rebuild(&mut self) {
        self.free_storage = 0;
        self.live_allocations = 0;
        self.bins.clear();

        for node in self.nodes.iter_mut() {
            *node = Node {
                generation: node.generation.wrapping_add(1),
                ..Node::default()
            };
        }

        // Stack in inverse order so that node 0 pops first.
        for (slot, index) in self.free_nodes.iter_mut().zip((0..self.max_allocs).rev()) {
            *slot = index;
        }
        self.free_count = self.max_allocs;

        let root = self.pop_free_node();
        self.insert_node_into_bin(root, self.size, 0);
    }

    /// Discards every allocation and returns to the initial state.
    ///
    /// Handles issued before the reset are rejected afterwards.
    pub fn reset(&mut self) {
        let dropped = self.live_allocations;
        self.rebuild();
        self.record(
            LogEvent::new(AllocatorLogLevel::Debug, "reset", "reset", "success").size(dropped),
        );
        self.audit("reset");
    }

    /// Reserves `size` contiguous bytes.
    ///
    /// Fails with [`AllocError::OutOfSpace`] when no spare node exists or no
    /// size class large enough has a free block. A failed call changes
    /// nothing.
    pub fn allocate(&mut self, size: u32) -> Result<Allocation, AllocError> {
        if size == 0 {
            self.record(LogEvent::new(
                AllocatorLogLevel::Warn,
                "allocate",
                "alloc_zero_size",
                "denied",
            ));
            return Err(AllocError::ZeroSize);
        }

        if self.free_count == 0 {
            self.record(
                LogEvent::new(AllocatorLogLevel::Info, "allocate", "out_of_nodes", "denied")
                    .size(size),
            );
            return Err(AllocError::OutOfSpace(Exhaustion::NodePool));
        }

        // Rounding up guarantees every block in the found bin fits.
        let min_bin = small_float::class_index_round_up(size);
        let found = self
            .bins
            .find_at_or_after(min_bin)
            .and_then(|bin| self.bins.head(bin).map(|head| (bin, head)));
        let Some((bin, index)) = found else {
            self.record(
                LogEvent::new(AllocatorLogLevel::Info, "allocate", "out_of_space", "denied")
                    .size(size)
                    .bin(min_bin),
            );
            return Err(AllocError::OutOfSpace(Exhaustion::Bytes));
        };

        self.unlink_from_bin(index);
        let node = &mut self.nodes[index as usize];
        let node_total_size = node.data_size;
        let offset = node.data_offset;
        debug_assert!(node_total_size >= size);
        node.data_size = size;
        node.state = NodeState::Used;

        let remainder = node_total_size - size;
        if remainder > 0 {
            let spare = self.pop_free_node();
            self.insert_node_into_bin(spare, remainder, offset + size);

            // Splice the remainder between the node and its old right
            // neighbor so the two can merge again later.
            let old_next = self.nodes[index as usize].neighbor_next;
            if let Some(next) = old_next {
                self.nodes[next as usize].neighbor_prev = Some(spare);
            }
            let spare_node = &mut self.nodes[spare as usize];
            spare_node.neighbor_prev = Some(index);
            spare_node.neighbor_next = old_next;
            self.nodes[index as usize].neighbor_next = Some(spare);
        }

        self.live_allocations += 1;
        let handle = NodeHandle {
            index,
            generation: self.nodes[index as usize].generation,
            pool: self.pool,
        };
        self.record(
            LogEvent::new(AllocatorLogLevel::Trace, "allocate", "alloc", "success")
                .offset(offset)
                .size(size)
                .bin(bin)
                .node(index),
        );
        self.audit("allocate");
        Ok(Allocation { offset, handle })
    }

    /// Returns an allocation's bytes, merging them with free neighbors.
    ///
    /// An invalid handle (double free, stale, foreign) is rejected before any
    /// state is touched.
    pub fn free(&mut self, allocation: Allocation) -> Result<(), HandleError> {
        let index = match self.validate_allocation(allocation) {
            Ok(index) => index,
            Err(err) => {
                self.record(
                    LogEvent::new(AllocatorLogLevel::Warn, "free", "invalid_handle", "rejected")
                        .offset(allocation.offset)
                        .node(allocation.handle.index),
                );
                return Err(err);
            }
        };

        let node = self.nodes[index as usize];
        let freed_size = node.data_size;
        let mut offset = node.data_offset;
        let mut size = node.data_size;
        let mut neighbor_prev = node.neighbor_prev;
        let mut neighbor_next = node.neighbor_next;
        let mut merged_prev = false;
        let mut merged_next = false;

        if let Some(prev) = neighbor_prev.filter(|&p| self.is_free(p)) {
            let prev_node = self.nodes[prev as usize];
            debug_assert_eq!(prev_node.neighbor_next, Some(index));
            offset = prev_node.data_offset;
            size += prev_node.data_size;
            neighbor_prev = prev_node.neighbor_prev;
            self.remove_node_from_bin(prev);
            merged_prev = true;
        }

        if let Some(next) = neighbor_next.filter(|&n| self.is_free(n)) {
            let next_node = self.nodes[next as usize];
            debug_assert_eq!(next_node.neighbor_prev, Some(index));
            size += next_node.data_size;
            neighbor_next = next_node.neighbor_next;
            self.remove_node_from_bin(next);
            merged_next = true;
        }

        self.push_free_node(index);
        self.live_allocations -= 1;

        let combined = self.pop_free_node();
        self.insert_node_into_bin(combined, size, offset);
        if let Some(next) = neighbor_next {
            self.nodes[combined as usize].neighbor_next = Some(next);
            self.nodes[next as usize].neighbor_prev = Some(combined);
        }
        if let Some(prev) = neighbor_prev {
            self.nodes[combined as usize].neighbor_prev = Some(prev);
            self.nodes[prev as usize].neighbor_next = Some(combined);
        }

        let outcome = match (merged_prev, merged_next) {
            (false, false) => "success",
            (true, false) => "merged_prev",
            (false, true) => "merged_next",
            (true, true) => "merged_both",
        };
        self.record(
            LogEvent::new(AllocatorLogLevel::Trace, "free", "free", outcome)
                .offset(allocation.offset)
                .size(freed_size)
                .bin(small_float::class_index_round_down(size))
                .node(combined),
        );
        self.audit("free");
        Ok(())
    }

    /// Size of a live allocation.
    pub fn allocation_size(&self, handle: NodeHandle) -> Result<u32, HandleError> {
        let index = self.validate_handle(handle)?;
        Ok(self.nodes[index as usize].data_size)
    }

    /// Free byte total and the largest class that can be served.
    #[must_use]
    pub fn storage_report(&self) -> StorageReport {
        let largest_free_region = self
            .bins
            .largest()
            .map_or(0, small_float::class_index_to_size);
        StorageReport {
            total_free_space: self.free_storage,
            largest_free_region,
        }
    }

    /// Free-list length of every size class. Walks all free nodes.
    #[must_use]
    pub fn storage_report_full(&self) -> StorageReportFull {
        let free_regions = (0..NUM_LEAF_BINS as u32)
            .map(|bin| {
                let mut count = 0;
                let mut cursor = self.bins.head(bin);
                while let Some(index) = cursor {
                    cursor = self.nodes[index as usize].bin_list_next;
                    count += 1;
                }
                FreeRegion {
                    size: small_float::class_index_to_size(bin),
                    count,
                }
            })
            .collect();
        StorageReportFull { free_regions }
    }

    /// Regions in offset order, starting at offset 0.
    #[must_use]
    pub fn regions(&self) -> Regions<'_> {
        Regions {
            nodes: &self.nodes,
            next: self.leftmost_node(),
            remaining: self.max_allocs as usize,
        }
    }

    /// Audits every structural invariant. O(nodes).
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        let Some(first) = self.leftmost_node() else {
            return Err(IntegrityError::NoNodes);
        };

        let mut expected: u64 = 0;
        let mut reachable: u32 = 0;
        let mut summed_free: u64 = 0;
        let mut previous: Option<NodeIndex> = None;
        let mut cursor = Some(first);

        while let Some(index) = cursor {
            if reachable >= self.max_allocs {
                return Err(IntegrityError::NodeAccounting {
                    vacant: self.free_count,
                    reachable,
                    max: self.max_allocs,
                });
            }
            let node = &self.nodes[index as usize];
            if node.state == NodeState::Vacant || node.neighbor_prev != previous {
                return Err(IntegrityError::BrokenNeighborLink {
                    index,
                    neighbor: previous.unwrap_or(index),
                });
            }
            if u64::from(node.data_offset) != expected {
                return Err(match previous {
                    None => IntegrityError::MisalignedStart {
                        offset: node.data_offset,
                    },
                    Some(_) => IntegrityError::Discontiguous {
                        index,
                        offset: node.data_offset,
                        expected: u32::try_from(expected).unwrap_or(u32::MAX),
                    },
                });
            }
            if node.state == NodeState::Free {
                if let Some(prev) = previous.filter(|&p| self.is_free(p)) {
                    return Err(IntegrityError::UncoalescedNeighbors {
                        left: prev,
                        right: index,
                    });
                }
                self.check_bin_membership(index)?;
                summed_free += u64::from(node.data_size);
            }

            expected += u64::from(node.data_size);
            reachable += 1;
            previous = Some(index);
            cursor = node.neighbor_next;
        }

        if expected != u64::from(self.size) {
            return Err(IntegrityError::CoverageMismatch {
                covered: expected,
                capacity: self.size,
            });
        }
        if summed_free != u64::from(self.free_storage) {
            return Err(IntegrityError::FreeStorageDrift {
                counted: self.free_storage,
                summed: summed_free,
            });
        }
        if reachable + self.free_count != self.max_allocs {
            return Err(IntegrityError::NodeAccounting {
                vacant: self.free_count,
                reachable,
                max: self.max_allocs,
            });
        }
        self.check_bins()
    }

    /// Size of the managed range.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.size
    }

    /// Size of the node pool.
    #[must_use]
    pub const fn max_allocations(&self) -> u32 {
        self.max_allocs
    }

    /// Running total of free bytes.
    #[must_use]
    pub const fn free_storage(&self) -> u32 {
        self.free_storage
    }

    /// Number of live allocations.
    #[must_use]
    pub const fn live_allocations(&self) -> u32 {
        self.live_allocations
    }

    /// Number of vacant node descriptors.
    #[must_use]
    pub const fn free_node_slots(&self) -> u32 {
        self.free_count
    }

    /// Handle checking policy in effect.
    #[must_use]
    pub const fn validation(&self) -> HandleValidation {
        self.validation
    }

    /// Id stamped into every handle this allocator issues.
    #[must_use]
    pub const fn pool_id(&self) -> u32 {
        self.pool
    }

    /// Returns a view of allocator lifecycle log records, oldest first.
    pub fn lifecycle_logs(&self) -> impl ExactSizeIterator<Item = &AllocatorLogRecord> + '_ {
        self.log.iter()
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    // ---------------------------------------------------------------------
    // Node pool and bin list primitives
    // ---------------------------------------------------------------------

    fn pop_free_node(&mut self) -> NodeIndex {
        debug_assert!(self.free_count > 0, "node pool underflow");
        self.free_count -= 1;
        let index = self.free_nodes[self.free_count as usize];
        let node = &mut self.nodes[index as usize];
        node.generation = node.generation.wrapping_add(1);
        index
    }

    fn push_free_node(&mut self, index: NodeIndex) {
        let node = &mut self.nodes[index as usize];
        *node = Node {
            generation: node.generation,
            ..Node::default()
        };
        self.free_nodes[self.free_count as usize] = index;
        self.free_count += 1;
    }

    /// Fills a freshly popped node as a free region and pushes it on top of
    /// its bin's list. Neighbor links are left for the caller.
    fn insert_node_into_bin(&mut self, index: NodeIndex, size: u32, data_offset: u32) {
        // Round down so every block filed in a bin is at least the bin size.
        let bin = small_float::class_index_round_down(size);
        let top = self.bins.head(bin);

        let node = &mut self.nodes[index as usize];
        *node = Node {
            data_offset,
            data_size: size,
            state: NodeState::Free,
            generation: node.generation,
            bin_list_prev: None,
            bin_list_next: top,
            neighbor_prev: None,
            neighbor_next: None,
        };
        if let Some(top) = top {
            self.nodes[top as usize].bin_list_prev = Some(index);
        }
        self.bins.set_head(bin, Some(index));
        self.free_storage += size;
    }

    /// Takes a free node out of its bin list without touching its slot.
    fn unlink_from_bin(&mut self, index: NodeIndex) {
        let node = self.nodes[index as usize];
        match node.bin_list_prev {
            Some(prev) => {
                self.nodes[prev as usize].bin_list_next = node.bin_list_next;
                if let Some(next) = node.bin_list_next {
                    self.nodes[next as usize].bin_list_prev = Some(prev);
                }
            }
            None => {
                // Head of its bin: the bin is recomputed from the size the
                // node was filed under.
                let bin = small_float::class_index_round_down(node.data_size);
                self.bins.set_head(bin, node.bin_list_next);
                if let Some(next) = node.bin_list_next {
                    self.nodes[next as usize].bin_list_prev = None;
                }
            }
        }
        let node = &mut self.nodes[index as usize];
        node.bin_list_prev = None;
        node.bin_list_next = None;
        self.free_storage -= node.data_size;
    }

    /// Unlinks a free node and returns its slot to the vacant stack.
    fn remove_node_from_bin(&mut self, index: NodeIndex) {
        self.unlink_from_bin(index);
        self.push_free_node(index);
    }

    #[inline]
    fn is_free(&self, index: NodeIndex) -> bool {
        self.nodes[index as usize].state == NodeState::Free
    }

    fn leftmost_node(&self) -> Option<NodeIndex> {
        let mut index = self
            .nodes
            .iter()
            .position(|n| n.state != NodeState::Vacant)? as NodeIndex;
        for _ in 0..self.max_allocs {
            match self.nodes[index as usize].neighbor_prev {
                Some(prev) => index = prev,
                None => return Some(index),
            }
        }
        None
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    fn validate_handle(&self, handle: NodeHandle) -> Result<NodeIndex, HandleError> {
        let checks = self.validation.checks_generation();
        if checks && handle.pool != self.pool {
            return Err(HandleError::ForeignPool {
                expected: self.pool,
                found: handle.pool,
            });
        }
        let Some(node) = self.nodes.get(handle.index as usize) else {
            return Err(HandleError::IndexOutOfRange {
                index: handle.index,
                max: self.max_allocs,
            });
        };
        if node.state != NodeState::Used {
            return Err(HandleError::NotAllocated {
                index: handle.index,
            });
        }
        if checks && node.generation != handle.generation {
            return Err(HandleError::StaleGeneration {
                index: handle.index,
                found: handle.generation,
                current: node.generation,
            });
        }
        Ok(handle.index)
    }

    fn validate_allocation(&self, allocation: Allocation) -> Result<NodeIndex, HandleError> {
        let index = self.validate_handle(allocation.handle)?;
        let actual = self.nodes[index as usize].data_offset;
        if self.validation.checks_generation() && actual != allocation.offset {
            return Err(HandleError::OffsetMismatch {
                index,
                found: allocation.offset,
                actual,
            });
        }
        Ok(index)
    }

    /// Walks from a free node back to its list head and checks the head is
    /// the one registered for the node's bin.
    fn check_bin_membership(&self, index: NodeIndex) -> Result<(), IntegrityError> {
        let bin = small_float::class_index_round_down(self.nodes[index as usize].data_size);
        let mut head = index;
        for _ in 0..self.max_allocs {
            match self.nodes[head as usize].bin_list_prev {
                Some(prev) => head = prev,
                None => break,
            }
        }
        if self.bins.head(bin) == Some(head) {
            Ok(())
        } else {
            Err(IntegrityError::NodeNotInBin { index, bin })
        }
    }

    fn check_bins(&self) -> Result<(), IntegrityError> {
        for bin in 0..NUM_LEAF_BINS as u32 {
            let head = self.bins.head(bin);
            if self.bins.is_marked(bin) != head.is_some() {
                return Err(IntegrityError::BitmapMismatch { bin });
            }
            let mut prev: Option<NodeIndex> = None;
            let mut cursor = head;
            let mut steps = 0;
            while let Some(index) = cursor {
                let node = &self.nodes[index as usize];
                let filed = small_float::class_index_round_down(node.data_size);
                steps += 1;
                if node.state != NodeState::Free
                    || filed != bin
                    || node.bin_list_prev != prev
                    || steps > self.max_allocs
                {
                    return Err(IntegrityError::StrayBinEntry { index, bin });
                }
                prev = Some(index);
                cursor = node.bin_list_next;
            }
        }
        for top in 0..NUM_TOP_BINS {
            if !self.bins.top_consistent(top) {
                return Err(IntegrityError::TopBitmapMismatch { top: top as u32 });
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Logging
    // ---------------------------------------------------------------------

    fn record(&mut self, event: LogEvent) {
        if !self.log.enabled(event.level) {
            return;
        }
        self.log.push(AllocatorLogRecord {
            decision_id: 0,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            offset: event.offset,
            size: event.size,
            bin: event.bin,
            node: event.node,
            outcome: event.outcome,
            free_storage: self.free_storage,
            live_allocations: self.live_allocations,
            free_node_slots: self.free_count,
        });
    }

    fn audit(&mut self, symbol: &'static str) {
        if !self.validation.audits() {
            return;
        }
        if self.verify_integrity().is_err() {
            self.record(LogEvent::new(
                AllocatorLogLevel::Error,
                symbol,
                "integrity_violation",
                "detected",
            ));
        }
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("capacity", &self.size)
            .field("max_allocations", &self.max_allocs)
            .field("free_storage", &self.free_storage)
            .field("live_allocations", &self.live_allocations)
            .field("free_node_slots", &self.free_count)
            .field("pool", &self.pool)
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}
