//! Per-path debouncing
//!
//! Coalesces bursts of events for the same path into the last one, emitted
//! once the path has been quiet for the debounce window. Deletions skip the
//! window: they supersede any pending event and are emitted on the next pop.

use settle_core::{ChangeEvent, OperationType};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct DebounceEntry {
    pending_event: ChangeEvent,
    quiet_deadline: Instant,
    /// Submission order, breaks ties between equal deadlines
    seq: u64,
}

/// Pending events keyed by path
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    entries: HashMap<PathBuf, DebounceEntry>,
    /// Events due immediately, in submission order
    ready: VecDeque<ChangeEvent>,
    next_seq: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
            ready: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Submit an event stamped with the current time
    pub fn submit(&mut self, event: ChangeEvent) {
        self.submit_at(event, Instant::now());
    }

    /// Submit an event; replaces any pending event for the same path
    pub fn submit_at(&mut self, event: ChangeEvent, now: Instant) {
        if event.operation_type() == OperationType::Deleted {
            self.entries.remove(event.file_path());
            self.ready.push_back(event);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            event.file_path().to_path_buf(),
            DebounceEntry {
                pending_event: event,
                quiet_deadline: now + self.window,
                seq,
            },
        );
    }

    /// Remove and return the next event that is due at `now`
    ///
    /// Immediate events come first, then expired entries in deadline order.
    pub fn pop_due(&mut self, now: Instant) -> Option<ChangeEvent> {
        if let Some(event) = self.ready.pop_front() {
            return Some(event);
        }

        let path = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.quiet_deadline <= now)
            .min_by_key(|(_, entry)| (entry.quiet_deadline, entry.seq))
            .map(|(path, _)| path.clone())?;

        self.entries.remove(&path).map(|entry| entry.pending_event)
    }

    /// Remove and return every event due at `now`, in emission order
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut due = Vec::new();
        while let Some(event) = self.pop_due(now) {
            due.push(event);
        }
        due
    }

    /// Earliest instant at which an event becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.ready.is_empty() {
            return Some(Instant::now());
        }
        self.entries.values().map(|entry| entry.quiet_deadline).min()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ready.clear();
    }

    /// Number of events waiting to be emitted
    pub fn len(&self) -> usize {
        self.entries.len() + self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const WINDOW: Duration = Duration::from_millis(100);

    fn modified(path: &str, size: u64) -> ChangeEvent {
        ChangeEvent::new(path, OperationType::Modified, true, Some(size))
    }

    #[test]
    fn test_not_emitted_before_window() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();

        debouncer.submit_at(modified("/a", 1), now);

        assert!(debouncer.pop_due(now).is_none());
        assert!(debouncer.pop_due(now + Duration::from_millis(99)).is_none());
        assert_eq!(debouncer.len(), 1);

        let event = debouncer.pop_due(now + WINDOW).unwrap();
        assert_eq!(event.file_path(), Path::new("/a"));
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_burst_coalesces_to_last_event() {
        let mut debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();

        for i in 0..5u64 {
            debouncer.submit_at(modified("/burst", i * 10), start + Duration::from_millis(i * 20));
        }

        // 100ms after the first, but only 20ms after the last
        assert!(debouncer.pop_due(start + Duration::from_millis(100)).is_none());

        let due = debouncer.drain_due(start + Duration::from_millis(180));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].size_bytes(), Some(40));
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_deletion_bypasses_window() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();

        debouncer.submit_at(modified("/doomed", 5), now);
        debouncer.submit_at(ChangeEvent::deleted("/doomed"), now);

        let event = debouncer.pop_due(now).unwrap();
        assert_eq!(event.operation_type(), OperationType::Deleted);

        assert!(debouncer.drain_due(now + WINDOW * 10).is_empty());
    }

    #[test]
    fn test_expiry_order_follows_deadline() {
        let mut debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.submit_at(modified("/first", 1), start);
        debouncer.submit_at(modified("/second", 1), start + Duration::from_millis(10));
        // Resubmitting pushes /first's deadline past /second's
        debouncer.submit_at(modified("/first", 2), start + Duration::from_millis(20));

        let due = debouncer.drain_due(start + Duration::from_secs(1));
        let paths: Vec<&Path> = due.iter().map(|e| e.file_path()).collect();
        assert_eq!(paths, vec![Path::new("/second"), Path::new("/first")]);
    }

    #[test]
    fn test_equal_deadlines_keep_submission_order() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();

        for name in ["/c", "/a", "/b"] {
            debouncer.submit_at(modified(name, 1), now);
        }

        let due = debouncer.drain_due(now + WINDOW);
        let paths: Vec<&Path> = due.iter().map(|e| e.file_path()).collect();
        assert_eq!(paths, vec![Path::new("/c"), Path::new("/a"), Path::new("/b")]);
    }

    #[test]
    fn test_next_deadline() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();
        assert!(debouncer.next_deadline().is_none());

        debouncer.submit_at(modified("/late", 1), now + Duration::from_millis(50));
        debouncer.submit_at(modified("/early", 1), now);
        assert_eq!(debouncer.next_deadline(), Some(now + WINDOW));

        debouncer.clear();
        assert!(debouncer.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_uses_runtime_clock() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.submit(modified("/clocked", 1));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(debouncer.pop_due(Instant::now()).is_none());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(debouncer.pop_due(Instant::now()).is_some());
    }
}
