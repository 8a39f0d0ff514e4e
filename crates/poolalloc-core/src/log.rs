//! Structured allocator lifecycle records.
//!
//! Each allocator owns a bounded, level-filtered record buffer. Callers pull
//! records with `lifecycle_logs()`/`drain_lifecycle_logs()`; [`to_jsonl`]
//! renders them one JSON object per line.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::LogLevelSetting;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `deallocate`, `reallocate`, `refill`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `arena_grow`, `free_list_scavenged`, ...).
    pub event: &'static str,
    /// Address involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Size class, when the small tier was involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: bytes left in the arena.
    pub arena_remaining: usize,
    /// Snapshot: cumulative bytes obtained for the arena.
    pub heap_size: usize,
    /// Snapshot: bytes parked on free lists.
    pub free_bytes: usize,
}

/// Fields a caller supplies for one record; the log fills in ids.
#[derive(Debug)]
pub(crate) struct LogEvent {
    symbol: &'static str,
    event: &'static str,
    outcome: &'static str,
    ptr: Option<usize>,
    size: Option<usize>,
    class: Option<usize>,
    details: String,
}

impl LogEvent {
    pub fn new(symbol: &'static str, event: &'static str, outcome: &'static str) -> Self {
        Self {
            symbol,
            event,
            outcome,
            ptr: None,
            size: None,
            class: None,
            details: String::new(),
        }
    }

    pub fn ptr<T>(mut self, ptr: std::ptr::NonNull<T>) -> Self {
        self.ptr = Some(ptr.as_ptr() as usize);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Snapshot values copied into every record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogSnapshot {
    pub arena_remaining: usize,
    pub heap_size: usize,
    pub free_bytes: usize,
}

/// Bounded, level-filtered record buffer.
#[derive(Debug)]
pub(crate) struct LifecycleLog {
    setting: LogLevelSetting,
    capacity: usize,
    next_decision_id: u64,
    records: VecDeque<AllocatorLogRecord>,
}

impl LifecycleLog {
    pub fn new(setting: LogLevelSetting, capacity: usize) -> Self {
        Self {
            setting,
            capacity,
            next_decision_id: 1,
            records: VecDeque::new(),
        }
    }

    /// True if a record at `level` would be retained. Lets callers skip
    /// formatting details for filtered events.
    #[inline]
    pub fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.capacity > 0 && self.setting.allows(level)
    }

    pub fn record(&mut self, level: AllocatorLogLevel, event: LogEvent, snapshot: LogSnapshot) {
        if !self.enabled(level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id: format!("pool::{}::{:016x}", event.symbol, decision_id),
            level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            class: event.class,
            outcome: event.outcome,
            details: event.details,
            arena_remaining: snapshot.arena_remaining,
            heap_size: snapshot.heap_size,
            free_bytes: snapshot.free_bytes,
        });
    }

    pub fn records(&self) -> &VecDeque<AllocatorLogRecord> {
        &self.records
    }

    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }
}

/// Renders records as JSON lines, one object per record.
///
/// Fails on the first record that does not serialize; nothing is skipped.
pub fn to_jsonl<'a, T, I>(records: I) -> Result<String, serde_json::Error>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
