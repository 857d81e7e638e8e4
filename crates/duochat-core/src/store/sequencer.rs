//! Ordered key generation for append-only logs.
//!
//! Assigns monotonic indices per log path, independent of any client clock.
//! Maintains `next_index` per path, initialized lazily from the keys already
//! stored there. Keys are zero-padded decimal so lexicographic order equals
//! numeric order.

use std::collections::HashMap;

use serde_json::Value;

use super::StoreError;
use crate::path::{PathSegment, StorePath};

/// Width of a rendered key. Fits `u64::MAX`.
const KEY_WIDTH: usize = 20;

/// Render an index as an ordered key.
pub fn format_key(index: u64) -> String {
    format!("{index:0width$}", width = KEY_WIDTH)
}

/// Parse a key produced by [`format_key`].
pub fn parse_key(key: &str) -> Option<u64> {
    if key.len() != KEY_WIDTH || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Per-path sequencer state (cached)
#[derive(Debug, Clone)]
struct LogSequencer {
    /// Next index to assign
    next_index: u64,
}

/// Assigns ordered keys for [`Store::append_ordered`](super::Store::append_ordered).
#[derive(Debug, Default)]
pub struct KeySequencer {
    logs: HashMap<StorePath, LogSequencer>,
}

impl KeySequencer {
    /// Create a new sequencer (empty state).
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key for the log at `path`, given the node currently stored there.
    ///
    /// # Invariants
    ///
    /// - Post: returned key sorts after every generated key already present
    /// - Post: the cached `next_index` for `path` is incremented
    pub fn next_key(
        &mut self,
        path: &StorePath,
        current: Option<&Value>,
    ) -> Result<PathSegment, StoreError> {
        let log = self.logs.entry(path.clone()).or_insert_with(|| {
            let next_index = next_index_from(current);
            tracing::debug!(%path, next_index, "Initialized log sequencer from store");
            LogSequencer { next_index }
        });

        let candidate = format_key(log.next_index);
        if current.and_then(Value::as_object).is_some_and(|children| children.contains_key(&candidate))
        {
            // Cached state drifted from the tree (a direct write under the log).
            let next_index = next_index_from(current);
            tracing::warn!(%path, stale = log.next_index, next_index, "Re-initializing log sequencer after key conflict");
            log.next_index = next_index;
        }

        let index = log.next_index;
        log.next_index = log
            .next_index
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidPath(format!("key space exhausted at {path}")))?;

        debug_assert!(log.next_index > index);

        PathSegment::new(format_key(index))
    }

    /// Forget cached state for `path` so the next append re-reads the tree.
    pub fn clear(&mut self, path: &StorePath) -> bool {
        self.logs.remove(path).is_some()
    }

    /// Next index that will be assigned for `path` (for testing/debugging).
    pub fn peek(&self, path: &StorePath) -> Option<u64> {
        self.logs.get(path).map(|log| log.next_index)
    }
}

/// One past the largest generated key among the children of `current`.
fn next_index_from(current: Option<&Value>) -> u64 {
    current
        .and_then(Value::as_object)
        .and_then(|children| children.keys().filter_map(|k| parse_key(k)).max())
        .map_or(0, |latest| latest.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn log_path() -> StorePath {
        StorePath::parse("rooms/a~b/messages").expect("valid path")
    }

    #[test]
    fn keys_sort_numerically() {
        assert!(format_key(9) < format_key(10));
        assert!(format_key(99) < format_key(100));
        assert_eq!(parse_key(&format_key(42)), Some(42));
        assert_eq!(parse_key("42"), None);
        assert_eq!(parse_key(&format_key(u64::MAX)), Some(u64::MAX));
    }

    #[test]
    fn sequential_keys() {
        let mut sequencer = KeySequencer::new();
        let path = log_path();

        for i in 0..3 {
            let key = sequencer.next_key(&path, None).expect("sequencing failed");
            assert_eq!(parse_key(key.as_str()), Some(i));
        }
        assert_eq!(sequencer.peek(&path), Some(3));
    }

    #[test]
    fn initializes_from_existing_children() {
        let mut sequencer = KeySequencer::new();
        let path = log_path();
        let existing = json!({ (format_key(0)): {}, (format_key(4)): {}, "legacy": {} });

        let key = sequencer.next_key(&path, Some(&existing)).expect("sequencing failed");

        assert_eq!(parse_key(key.as_str()), Some(5));
    }

    #[test]
    fn recovers_from_drifted_cache() {
        let mut sequencer = KeySequencer::new();
        let path = log_path();

        sequencer.next_key(&path, None).expect("sequencing failed");
        // Someone wrote keys 1 and 2 directly.
        let current = json!({ (format_key(0)): {}, (format_key(1)): {}, (format_key(2)): {} });

        let key = sequencer.next_key(&path, Some(&current)).expect("sequencing failed");

        assert_eq!(parse_key(key.as_str()), Some(3));
    }

    #[test]
    fn independent_logs() {
        let mut sequencer = KeySequencer::new();
        let first = log_path();
        let second = StorePath::parse("reports").expect("valid path");

        for _ in 0..3 {
            sequencer.next_key(&first, None).expect("sequencing failed");
        }
        for _ in 0..5 {
            sequencer.next_key(&second, None).expect("sequencing failed");
        }

        assert_eq!(sequencer.peek(&first), Some(3));
        assert_eq!(sequencer.peek(&second), Some(5));
        assert!(sequencer.clear(&first));
        assert_eq!(sequencer.peek(&first), None);
    }
}
