use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use metrics::counter;
use tracing::{error, info, warn};

use crate::model::{LogEntry, LogLevel, NewLogEntry};

/// Number of entries retained before the oldest is evicted.
pub const ACTIVITY_CAPACITY: usize = 100;

/// Immediate operator channel for the most severe activity classes.
pub trait OperatorNotifier: Send + Sync {
    fn notify(&self, entry: &LogEntry);
}

/// Default notifier: a dedicated tracing target operators can route.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl OperatorNotifier for TracingNotifier {
    fn notify(&self, entry: &LogEntry) {
        warn!(
            target: "forwarder::notify",
            id = entry.id,
            level = entry.level.as_ref(),
            "{}",
            entry.message
        );
    }
}

struct ActivityLog {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

/// Append-only capped activity log shared by every component.
#[derive(Clone)]
pub struct ActivityRecorder {
    inner: Arc<Mutex<ActivityLog>>,
    notifier: Arc<dyn OperatorNotifier>,
    capacity: usize,
}

impl ActivityRecorder {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(TracingNotifier))
    }

    pub fn with_notifier(notifier: Arc<dyn OperatorNotifier>) -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY, notifier)
    }

    pub fn with_capacity(capacity: usize, notifier: Arc<dyn OperatorNotifier>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(ActivityLog {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
            })),
            notifier,
            capacity,
        }
    }

    pub fn append(&self, entry: NewLogEntry) -> LogEntry {
        let stored = {
            let mut guard = self.inner.lock().expect("mutex poisoned");
            let stored = LogEntry {
                id: guard.next_id,
                timestamp: Utc::now(),
                level: entry.level,
                message: entry.message,
                detail: entry.detail,
            };
            guard.next_id += 1;
            guard.entries.push_front(stored.clone());
            while guard.entries.len() > self.capacity {
                guard.entries.pop_back();
            }
            stored
        };

        mirror(&stored);
        counter!(
            "forwarder_activity_entries_total",
            "level" => stored.level.as_ref().to_owned()
        )
        .increment(1);
        if stored.level.is_notifiable() {
            self.notifier.notify(&stored);
        }
        stored
    }

    pub fn record(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        self.append(NewLogEntry::new(level, message))
    }

    pub fn clear(&self) {
        self.inner.lock().expect("mutex poisoned").entries.clear();
    }

    /// Snapshot of the retained entries, most recent first.
    pub fn list(&self) -> Vec<LogEntry> {
        let guard = self.inner.lock().expect("mutex poisoned");
        guard.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActivityRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActivityRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRecorder")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

fn mirror(entry: &LogEntry) {
    let level = entry.level.as_ref();
    let detail = entry
        .detail
        .as_ref()
        .map(|detail| serde_json::to_string(detail).unwrap_or_default());
    match entry.level {
        LogLevel::Error => error!(id = entry.id, level, ?detail, "{}", entry.message),
        LogLevel::Warning => warn!(id = entry.id, level, ?detail, "{}", entry.message),
        _ => info!(id = entry.id, level, ?detail, "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        seen: AtomicUsize,
    }

    impl OperatorNotifier for CountingNotifier {
        fn notify(&self, _entry: &LogEntry) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lists_most_recent_first() {
        let recorder = ActivityRecorder::new();
        recorder.record(LogLevel::Info, "first");
        recorder.record(LogLevel::Balance, "second");

        let entries = recorder.list();
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[1].message, "first");
        assert!(entries[0].id > entries[1].id);
    }

    #[test]
    fn caps_at_capacity_and_evicts_oldest() {
        let recorder = ActivityRecorder::new();
        for i in 0..(ACTIVITY_CAPACITY + 25) {
            recorder.record(LogLevel::Info, format!("entry {i}"));
        }

        let entries = recorder.list();
        assert_eq!(entries.len(), ACTIVITY_CAPACITY);
        assert_eq!(entries[0].message, format!("entry {}", ACTIVITY_CAPACITY + 24));
        assert_eq!(entries[ACTIVITY_CAPACITY - 1].message, "entry 25");
    }

    #[test]
    fn clear_empties_but_keeps_ids_monotonic() {
        let recorder = ActivityRecorder::new();
        let first = recorder.record(LogLevel::Info, "a");
        recorder.clear();
        assert!(recorder.is_empty());
        let next = recorder.record(LogLevel::Info, "b");
        assert!(next.id > first.id);
    }

    #[test]
    fn notifies_only_severe_levels() {
        let notifier = Arc::new(CountingNotifier::default());
        let recorder = ActivityRecorder::with_notifier(notifier.clone());
        recorder.record(LogLevel::Info, "tick");
        recorder.record(LogLevel::Detection, "deposit");
        recorder.record(LogLevel::Signature, "signed");
        recorder.record(LogLevel::Success, "forwarded");
        recorder.record(LogLevel::Error, "failed");
        recorder.record(LogLevel::Warning, "low funds");
        assert_eq!(notifier.seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn keeps_structured_detail() {
        let recorder = ActivityRecorder::new();
        let entry = recorder.append(
            NewLogEntry::new(LogLevel::Broadcast, "submitted")
                .with_detail("tx_id", "abc")
                .with_detail("attempt", 2),
        );
        let detail = entry.detail.expect("detail present");
        assert_eq!(detail["tx_id"], "abc");
        assert_eq!(detail["attempt"], 2);
    }
}
