//! Access-Frequency Tracker (spec.md §4.4): a cross-cutting map from path to
//! usage statistics, feeding `Priority` to the LMI, ISE, and CS alike.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::types::Priority;

#[derive(Debug, Clone, Copy)]
struct AftEntry {
    count: u64,
    last_access: i64,
}

/// In-memory, lost-on-restart access statistics (spec.md §3: "AFT map").
/// Sharded via `DashMap` since `touch` is called from foreground queries as
/// well as scanner and watcher callbacks and must not serialize unrelated
/// paths against each other.
pub struct Aft {
    entries: DashMap<String, AftEntry>,
    cap: usize,
}

fn depth_of(path: &str) -> usize {
    if path == "." {
        0
    } else {
        path.matches('/').count() + 1
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

impl Aft {
    pub fn new(cap: usize) -> Self {
        Self { entries: DashMap::new(), cap }
    }

    /// Increment the visit count for `path` and refresh `last_access`.
    /// Evicts the least-recently-accessed entry if this insert would exceed
    /// the configured cap.
    pub fn touch(&self, path: &str) {
        let now = now_unix();
        self.entries
            .entry(path.to_string())
            .and_modify(|e| {
                e.count += 1;
                e.last_access = now;
            })
            .or_insert(AftEntry { count: 1, last_access: now });

        if self.entries.len() > self.cap {
            self.evict_lru();
        }
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Current priority for `path`, per spec.md §4.4's rule table. Paths
    /// never touched default to `Medium` (the rule's fallthrough case).
    pub fn priority(&self, path: &str) -> Priority {
        let depth = depth_of(path);
        if depth <= 1 {
            return Priority::Critical;
        }

        let Some(entry) = self.entries.get(path) else {
            return if depth > 5 { Priority::Low } else { Priority::Medium };
        };

        let now = now_unix();
        let age = Duration::from_secs((now - entry.last_access).max(0) as u64);

        if entry.count > 10 && age <= Duration::from_secs(24 * 60 * 60) {
            Priority::High
        } else if entry.count > 5 && age <= Duration::from_secs(7 * 24 * 60 * 60) {
            Priority::Medium
        } else if depth > 5 {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    /// Raw observed visit count, used by ISE ranking's `access count` signal.
    pub fn access_count(&self, path: &str) -> u64 {
        self.entries.get(path).map(|e| e.count).unwrap_or(0)
    }

    /// Unix timestamp of the most recent `touch`, or `None` if `path` has
    /// never been touched. Backs the Meta tier's `last_access` field.
    pub fn last_access(&self, path: &str) -> Option<i64> {
        self.entries.get(path).map(|e| e.last_access)
    }

    /// Drop every tracked path under a removed subtree (spec.md §4.1:
    /// `unlinkDir` "purge AFT entries whose path begins with `<path>/`").
    pub fn purge(&self, prefix: &str) {
        let prefix_with_slash = format!("{prefix}/");
        self.entries.retain(|key, _| key != prefix && !key.starts_with(&prefix_with_slash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Depth helper shared with callers that only have a `std::path::Path`.
pub fn depth_of_path(path: &Path) -> usize {
    path.components().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_level_is_always_critical() {
        let aft = Aft::new(100);
        assert_eq!(aft.priority("a.txt"), Priority::Critical);
        assert_eq!(aft.priority("."), Priority::Critical);
    }

    #[test]
    fn untouched_deep_path_is_low() {
        let aft = Aft::new(100);
        assert_eq!(aft.priority("a/b/c/d/e/f.txt"), Priority::Low);
    }

    #[test]
    fn frequent_recent_access_promotes_to_high() {
        let aft = Aft::new(100);
        for _ in 0..11 {
            aft.touch("a/b.txt");
        }
        assert_eq!(aft.priority("a/b.txt"), Priority::High);
    }

    #[test]
    fn last_access_is_none_until_touched() {
        let aft = Aft::new(100);
        assert_eq!(aft.last_access("a/b.txt"), None);
        aft.touch("a/b.txt");
        assert!(aft.last_access("a/b.txt").is_some());
    }

    #[test]
    fn purge_drops_subtree_only() {
        let aft = Aft::new(100);
        aft.touch("a/b.txt");
        aft.touch("a/c/d.txt");
        aft.touch("other/e.txt");
        aft.purge("a");
        assert_eq!(aft.access_count("a/b.txt"), 0);
        assert_eq!(aft.access_count("a/c/d.txt"), 0);
        assert_eq!(aft.access_count("other/e.txt"), 1);
    }

    #[test]
    fn cap_evicts_least_recently_accessed() {
        let aft = Aft::new(2);
        aft.touch("a/1.txt");
        aft.touch("a/2.txt");
        aft.touch("a/3.txt");
        assert!(aft.len() <= 2);
    }
}
