//! Debounced edits.
//!
//! A value typed into a field is applied to the in-memory state at once, but
//! the expensive follow-up (recalculation and persistence) waits until the
//! field has been quiet for the debounce window. Leaving the field flushes
//! the pending edit immediately.
//!
//! Time is passed in by the caller so the queue can be driven by any clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default quiet period before a pending edit is released.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(650);

#[derive(Debug, Clone)]
struct PendingEdit<V> {
    value: V,
    due: Instant,
}

/// Pending edits keyed by the record they belong to. The latest edit for a
/// key replaces the earlier one and restarts its window.
#[derive(Debug, Clone)]
pub struct DebouncedEdits<K, V> {
    window: Duration,
    pending: BTreeMap<K, PendingEdit<V>>,
}

impl<K: Ord + Clone, V> DebouncedEdits<K, V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn schedule(
        &mut self,
        key: K,
        value: V,
        now: Instant,
    ) {
        self.pending.insert(
            key,
            PendingEdit {
                value,
                due: now + self.window,
            },
        );
    }

    /// Removes and returns every edit whose window has elapsed at `now`.
    pub fn poll(
        &mut self,
        now: Instant,
    ) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, edit)| edit.due <= now)
            .map(|(key, _)| key.clone())
            .collect();

        due.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|edit| (key, edit.value)))
            .collect()
    }

    /// Cancels the window for `key` and returns its edit right away.
    pub fn flush(
        &mut self,
        key: &K,
    ) -> Option<V> {
        self.pending.remove(key).map(|edit| edit.value)
    }

    pub fn flush_all(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(key, edit)| (key, edit.value))
            .collect()
    }

    pub fn is_pending(
        &self,
        key: &K,
    ) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Ord + Clone, V> Default for DebouncedEdits<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn edits() -> DebouncedEdits<&'static str, u32> {
        DebouncedEdits::new(Duration::from_millis(500))
    }

    #[test]
    fn edit_is_held_until_window_elapses() {
        let start = Instant::now();
        let mut edits = edits();
        edits.schedule("emp-1", 1, start);

        assert!(edits.poll(start + Duration::from_millis(499)).is_empty());
        assert_eq!(edits.poll(start + Duration::from_millis(500)), vec![("emp-1", 1)]);
        assert!(edits.is_empty());
    }

    #[test]
    fn later_edit_replaces_earlier_and_restarts_window() {
        let start = Instant::now();
        let mut edits = edits();
        edits.schedule("emp-1", 1, start);
        edits.schedule("emp-1", 2, start + Duration::from_millis(300));

        assert!(edits.poll(start + Duration::from_millis(600)).is_empty());
        assert_eq!(edits.poll(start + Duration::from_millis(800)), vec![("emp-1", 2)]);
    }

    #[test]
    fn keys_are_independent() {
        let start = Instant::now();
        let mut edits = edits();
        edits.schedule("emp-1", 1, start);
        edits.schedule("emp-2", 2, start + Duration::from_millis(400));

        let first = edits.poll(start + Duration::from_millis(500));

        assert_eq!(first, vec![("emp-1", 1)]);
        assert!(edits.is_pending(&"emp-2"));
    }

    #[test]
    fn flush_releases_edit_immediately() {
        let start = Instant::now();
        let mut edits = edits();
        edits.schedule("emp-1", 7, start);

        assert_eq!(edits.flush(&"emp-1"), Some(7));
        assert_eq!(edits.flush(&"emp-1"), None);
        assert!(edits.poll(start + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn flush_all_drains_queue() {
        let start = Instant::now();
        let mut edits = edits();
        edits.schedule("emp-2", 2, start);
        edits.schedule("emp-1", 1, start);

        assert_eq!(edits.flush_all(), vec![("emp-1", 1), ("emp-2", 2)]);
        assert_eq!(edits.len(), 0);
    }
}
