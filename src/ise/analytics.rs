//! Query analytics (spec.md §4.2 "Query analytics"): history, pattern
//! frequencies, session tracking, and ISE-local path priorities, all backed
//! by `DashMap` so foreground searches never serialize against each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::types::Priority;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[derive(Debug, Clone)]
pub struct QueryHistoryEntry {
    pub count: u64,
    pub last_search: i64,
    pub avg_response_time_ms: f64,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PathPriorityEntry {
    pub access_count: u64,
    pub search_count: u64,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub queries: Vec<String>,
    pub start_time: i64,
    pub last_seen: i64,
}

/// Extract the pattern tags spec.md §4.2 defines for one query.
pub fn extract_patterns(query: &str) -> Vec<String> {
    let mut patterns = Vec::new();

    if let Some(dot) = query.rfind('.') {
        let suffix = &query[dot + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_alphanumeric()) {
            patterns.push(format!("ext:{suffix}"));
        }
    }
    if query.contains('/') || query.contains('\\') {
        patterns.push("path:contains_separator".to_string());
    }
    if query.chars().any(|c| c.is_ascii_digit()) {
        patterns.push("contains:numbers".to_string());
    }
    if query.chars().any(|c| "_-. ".contains(c)) {
        patterns.push("contains:separators".to_string());
    }
    if query.len() <= 3 {
        patterns.push("length:short".to_string());
    } else if query.len() > 20 {
        patterns.push("length:long".to_string());
    }
    if query.split_whitespace().count() > 1 {
        patterns.push("multi:word".to_string());
    }

    patterns
}

/// History, pattern frequencies, sessions, and path priorities for the ISE.
pub struct Analytics {
    history: DashMap<String, QueryHistoryEntry>,
    patterns: DashMap<String, u64>,
    sessions: DashMap<String, Session>,
    path_priorities: DashMap<String, PathPriorityEntry>,
    session_timeout: Duration,
    promote_threshold: u32,
}

impl Analytics {
    pub fn new(session_timeout: Duration, promote_threshold: u32) -> Self {
        Self {
            history: DashMap::new(),
            patterns: DashMap::new(),
            sessions: DashMap::new(),
            path_priorities: DashMap::new(),
            session_timeout,
            promote_threshold,
        }
    }

    /// Record a completed search: updates history's running-mean response
    /// time, pattern frequencies, and the session's query list.
    pub fn record_search(&self, query: &str, session_id: &str, response_time_ms: f64) {
        let patterns = extract_patterns(query);
        let now = now_unix();

        self.history
            .entry(query.to_string())
            .and_modify(|h| {
                let new_count = h.count + 1;
                h.avg_response_time_ms = (h.avg_response_time_ms * h.count as f64 + response_time_ms) / new_count as f64;
                h.count = new_count;
                h.last_search = now;
                h.patterns = patterns.clone();
            })
            .or_insert(QueryHistoryEntry { count: 1, last_search: now, avg_response_time_ms: response_time_ms, patterns: patterns.clone() });

        for pattern in &patterns {
            *self.patterns.entry(pattern.clone()).or_insert(0) += 1;
        }

        self.sessions
            .entry(session_id.to_string())
            .and_modify(|s| {
                s.queries.push(query.to_string());
                s.last_seen = now;
            })
            .or_insert(Session { queries: vec![query.to_string()], start_time: now, last_seen: now });
    }

    /// `search_count` increments per result return (spec.md §4.2 "Path
    /// priorities"); auto-promotes above `path_priority_promote_threshold`.
    pub fn record_result_return(&self, path: &str) {
        let mut entry = self.path_priorities.entry(path.to_string()).or_insert(PathPriorityEntry {
            access_count: 0,
            search_count: 0,
            priority: Priority::Medium,
        });
        entry.search_count += 1;
        if entry.search_count as u32 > self.promote_threshold {
            entry.priority = Priority::High;
        }
    }

    pub fn record_access(&self, path: &str) {
        let mut entry = self.path_priorities.entry(path.to_string()).or_insert(PathPriorityEntry {
            access_count: 0,
            search_count: 0,
            priority: Priority::Medium,
        });
        entry.access_count += 1;
    }

    pub fn path_priority(&self, path: &str) -> Option<PathPriorityEntry> {
        self.path_priorities.get(path).map(|e| e.clone())
    }

    pub fn history_entry(&self, query: &str) -> Option<QueryHistoryEntry> {
        self.history.get(query).map(|e| e.clone())
    }

    /// Pattern frequency counters, used by `smartPreCache` to bias priority.
    pub fn pattern_frequency(&self, pattern: &str) -> u64 {
        self.patterns.get(pattern).map(|c| *c).unwrap_or(0)
    }

    /// Every path with `search_count > threshold` or at least `min_priority`,
    /// used by `smartPreCache` (spec.md §4.2).
    pub fn precache_candidates(&self, search_count_threshold: u32, min_priority: Priority) -> Vec<String> {
        self.path_priorities
            .iter()
            .filter(|e| e.search_count as u32 > search_count_threshold || e.priority >= min_priority)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Past queries with similarity >= 0.7 to `query`, used for suggestions.
    pub fn similar_history_queries(&self, query: &str, threshold: f64, cap: usize) -> Vec<String> {
        let mut matches: Vec<(String, f64)> = self
            .history
            .iter()
            .filter(|e| e.key() != query)
            .map(|e| (e.key().clone(), crate::ise::ranking::similarity(e.key(), query)))
            .filter(|(_, sim)| *sim >= threshold)
            .collect();
        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        matches.into_iter().take(cap).map(|(q, _)| q).collect()
    }

    /// Evict sessions that have been inactive past `session_timeout`.
    pub fn evict_stale_sessions(&self) {
        let now = now_unix();
        let timeout = self.session_timeout.as_secs() as i64;
        self.sessions.retain(|_, s| now - s.last_seen < timeout);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the whole history table, used by periodic persistence.
    pub fn all_history(&self) -> Vec<(String, QueryHistoryEntry)> {
        self.history.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn all_patterns(&self) -> Vec<(String, u64)> {
        self.patterns.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    pub fn all_path_priorities(&self) -> Vec<(String, PathPriorityEntry)> {
        self.path_priorities.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Restore one persisted row. Used on ISE init (spec.md §4.2 "Persisted analytics").
    pub fn load_history(&self, query: String, entry: QueryHistoryEntry) {
        self.history.insert(query, entry);
    }

    pub fn load_pattern(&self, pattern: String, frequency: u64) {
        self.patterns.insert(pattern, frequency);
    }

    pub fn load_path_priority(&self, path: String, entry: PathPriorityEntry) {
        self.path_priorities.insert(path, entry);
    }
}

/// Monotonic counter backing `search_<ms>_<rand9>` id generation
/// (spec.md §4.2 "Progress events").
pub struct SearchIdGenerator {
    counter: AtomicU64,
}

impl SearchIdGenerator {
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }

    pub fn next(&self, now_ms: i64) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let rand_part: u32 = rand::random::<u32>() % 1_000_000_000;
        format!("search_{now_ms}_{rand_part:09}_{seq}")
    }
}

impl Default for SearchIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_patterns_detects_extension_and_length() {
        let patterns = extract_patterns("report.pdf");
        assert!(patterns.contains(&"ext:pdf".to_string()));
    }

    #[test]
    fn extract_patterns_flags_short_query() {
        assert!(extract_patterns("a").contains(&"length:short".to_string()));
    }

    #[test]
    fn record_search_tracks_running_mean() {
        let analytics = Analytics::new(Duration::from_secs(3600), 5);
        analytics.record_search("report.pdf", "s1", 10.0);
        analytics.record_search("report.pdf", "s1", 20.0);
        let entry = analytics.history_entry("report.pdf").unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.avg_response_time_ms, 15.0);
    }

    #[test]
    fn path_priority_promotes_after_threshold() {
        let analytics = Analytics::new(Duration::from_secs(3600), 5);
        for _ in 0..6 {
            analytics.record_result_return("a/b.txt");
        }
        let entry = analytics.path_priority("a/b.txt").unwrap();
        assert_eq!(entry.priority, Priority::High);
    }
}
