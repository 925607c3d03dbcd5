//! Structured JSONL logging for replay runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes entries to a file, stdout, or any writer.
//! - [`validate_log_line`]: checks a line carries the required fields.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Outcome of one replayed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Denied,
    Skipped,
    Failed,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only. The trace id is
    /// filled in by the emitter.
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: String::new(),
            level,
            event: event.into(),
            step: None,
            id: None,
            offset: None,
            size: None,
            outcome: None,
            details: None,
        }
    }

    #[must_use]
    pub const fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub const fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Writes JSONL entries with sequential trace ids.
pub struct LogEmitter<W: Write> {
    writer: W,
    seq: u64,
    run_id: String,
    enabled: bool,
}

impl LogEmitter<std::io::BufWriter<std::fs::File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file), run_id))
    }
}

impl LogEmitter<std::io::Sink> {
    /// An emitter that drops every entry.
    #[must_use]
    pub fn disabled() -> Self {
        let mut emitter = Self::new(std::io::sink(), "");
        emitter.enabled = false;
        emitter
    }
}

impl<W: Write> LogEmitter<W> {
    /// Create an emitter over any writer.
    pub fn new(writer: W, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
            enabled: true,
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("offalloc::{}::{:06}", self.run_id, self.seq)
    }

    /// Emit an entry, assigning its trace id if unset.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Number of entries emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.seq
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Checks a JSONL line parses and has non-empty required fields.
pub fn validate_log_line(line: &str) -> Result<LogEntry, String> {
    let entry: LogEntry = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    if entry.timestamp.is_empty() {
        return Err("missing timestamp".to_string());
    }
    if entry.trace_id.is_empty() {
        return Err("missing trace_id".to_string());
    }
    if entry.event.is_empty() {
        return Err("missing event".to_string());
    }
    Ok(entry)
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    // Approximate calendar, good enough for ordering log lines.
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_required_fields_only() {
        let entry = LogEntry::new(LogLevel::Info, "replay_start");
        let json: serde_json::Value = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert!(json["timestamp"].is_string());
        assert_eq!(json["level"], "info");
        assert_eq!(json["event"], "replay_start");
        assert!(json.get("offset").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn emitter_assigns_sequential_trace_ids() {
        let mut emitter = LogEmitter::new(Vec::new(), "run-1");
        emitter
            .emit_entry(LogEntry::new(LogLevel::Trace, "alloc").with_size(64))
            .unwrap();
        emitter
            .emit_entry(LogEntry::new(LogLevel::Trace, "free").with_outcome(Outcome::Success))
            .unwrap();
        assert_eq!(emitter.emitted(), 2);

        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let entries: Vec<LogEntry> = out
            .lines()
            .map(|line| validate_log_line(line).unwrap())
            .collect();
        assert_eq!(entries[0].trace_id, "offalloc::run-1::000001");
        assert_eq!(entries[1].trace_id, "offalloc::run-1::000002");
        assert_eq!(entries[0].size, Some(64));
        assert_eq!(entries[1].outcome, Some(Outcome::Success));
    }

    #[test]
    fn disabled_emitter_writes_nothing() {
        let mut emitter = LogEmitter::disabled();
        emitter
            .emit_entry(LogEntry::new(LogLevel::Error, "ignored"))
            .unwrap();
        assert_eq!(emitter.emitted(), 0);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(validate_log_line("not json").is_err());
        let line = r#"{"timestamp":"t","trace_id":"","level":"info","event":"x"}"#;
        assert_eq!(validate_log_line(line).unwrap_err(), "missing trace_id");
    }
}
