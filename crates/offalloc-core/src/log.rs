//! Allocator lifecycle records.
//!
//! Every decision the allocator makes (grant, deny, free, reject, reset)
//! can be captured as an [`AllocatorLogRecord`] carrying a snapshot of the
//! allocator counters. Records are plain `Copy` data kept in a ring sized at
//! construction, so recording never allocates on the allocate/free path.

use std::collections::VecDeque;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse a level name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AllocatorLogRecord {
    /// Monotonic decision id, starting at 1 per allocator.
    pub decision_id: u64,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `free`, `reset`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `out_of_space`, `invalid_handle`, ...).
    pub event: &'static str,
    /// Offset involved in the event.
    pub offset: Option<u32>,
    /// Size involved in the event.
    pub size: Option<u32>,
    /// Size class involved in the event.
    pub bin: Option<u32>,
    /// Node index involved in the event.
    pub node: Option<u32>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Snapshot: free bytes.
    pub free_storage: u32,
    /// Snapshot: live allocation count.
    pub live_allocations: u32,
    /// Snapshot: unused node descriptors.
    pub free_node_slots: u32,
}

impl AllocatorLogRecord {
    /// Correlation id for this record.
    #[must_use]
    pub fn trace_id(&self) -> String {
        format!("offalloc::{}::{:016x}", self.symbol, self.decision_id)
    }
}

/// Event-specific part of a record; the allocator fills in the snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogEvent {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub offset: Option<u32>,
    pub size: Option<u32>,
    pub bin: Option<u32>,
    pub node: Option<u32>,
    pub outcome: &'static str,
}

impl LogEvent {
    pub(crate) const fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            offset: None,
            size: None,
            bin: None,
            node: None,
            outcome,
        }
    }

    pub(crate) const fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) const fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) const fn bin(mut self, bin: u32) -> Self {
        self.bin = Some(bin);
        self
    }

    pub(crate) const fn node(mut self, node: u32) -> Self {
        self.node = Some(node);
        self
    }
}

/// Fixed-capacity ring of lifecycle records. Oldest records are evicted.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleLog {
    records: VecDeque<AllocatorLogRecord>,
    capacity: usize,
    min_level: AllocatorLogLevel,
    next_decision_id: u64,
}

impl LifecycleLog {
    pub(crate) fn new(capacity: usize, min_level: AllocatorLogLevel) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            min_level,
            next_decision_id: 1,
        }
    }

    /// Whether a record at `level` would be kept.
    #[inline]
    pub(crate) fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.capacity > 0 && level >= self.min_level
    }

    pub(crate) fn push(&mut self, mut record: AllocatorLogRecord) {
        record.decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub(crate) fn iter(&self) -> impl ExactSizeIterator<Item = &AllocatorLogRecord> + '_ {
        self.records.iter()
    }

    pub(crate) fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: &'static str, level: AllocatorLogLevel) -> AllocatorLogRecord {
        AllocatorLogRecord {
            decision_id: 0,
            level,
            symbol: "allocate",
            event,
            offset: None,
            size: None,
            bin: None,
            node: None,
            outcome: "success",
            free_storage: 0,
            live_allocations: 0,
            free_node_slots: 0,
        }
    }

    #[test]
    fn parse_levels() {
        assert_eq!(AllocatorLogLevel::parse("TRACE"), Some(AllocatorLogLevel::Trace));
        assert_eq!(AllocatorLogLevel::parse("warning"), Some(AllocatorLogLevel::Warn));
        assert_eq!(AllocatorLogLevel::parse("loud"), None);
        assert!(AllocatorLogLevel::Error > AllocatorLogLevel::Info);
    }

    #[test]
    fn zero_capacity_disables_recording() {
        let log = LifecycleLog::new(0, AllocatorLogLevel::Trace);
        assert!(!log.enabled(AllocatorLogLevel::Error));
    }

    #[test]
    fn level_filter_applies() {
        let log = LifecycleLog::new(4, AllocatorLogLevel::Warn);
        assert!(!log.enabled(AllocatorLogLevel::Info));
        assert!(log.enabled(AllocatorLogLevel::Warn));
        assert!(log.enabled(AllocatorLogLevel::Error));
    }

    #[test]
    fn ring_evicts_oldest_and_numbers_decisions() {
        let mut log = LifecycleLog::new(2, AllocatorLogLevel::Trace);
        log.push(record("a", AllocatorLogLevel::Trace));
        log.push(record("b", AllocatorLogLevel::Trace));
        log.push(record("c", AllocatorLogLevel::Trace));

        let events: Vec<_> = log.iter().map(|r| (r.event, r.decision_id)).collect();
        assert_eq!(events, vec![("b", 2), ("c", 3)]);

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(log.iter().len(), 0);
        assert_eq!(drained[1].trace_id(), "offalloc::allocate::0000000000000003");
    }
}
