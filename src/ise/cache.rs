//! Contextual search cache (spec.md §4.2 "Contextual cache"): TTL + LRU
//! over full result sets, keyed by query string.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Entry;

/// Per-entry match-kind counts plus suggested follow-up queries, attached
/// to every cached result set.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub exact_count: usize,
    pub partial_count: usize,
    pub fuzzy_count: usize,
    pub directory_count: usize,
    pub file_count: usize,
    pub suggestions: Vec<String>,
}

struct CachedResult {
    results: Vec<Entry>,
    context: SearchContext,
    inserted_at: Instant,
    last_touched: Instant,
}

/// `query -> {results[0..100], timestamp, context}`, TTL-expired and
/// LRU-evicted in 10% batches once full (spec.md §4.2).
pub struct ContextualCache {
    entries: HashMap<String, CachedResult>,
    ttl: Duration,
    cap: usize,
    evict_fraction: f64,
}

impl ContextualCache {
    pub fn new(ttl: Duration, cap: usize, evict_fraction: f64) -> Self {
        Self { entries: HashMap::new(), ttl, cap, evict_fraction }
    }

    pub fn get(&mut self, query: &str) -> Option<(Vec<Entry>, SearchContext)> {
        let expired = match self.entries.get(query) {
            Some(cached) => cached.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(query);
            return None;
        }
        let cached = self.entries.get_mut(query)?;
        cached.last_touched = Instant::now();
        Some((cached.results.clone(), cached.context.clone()))
    }

    pub fn put(&mut self, query: String, results: Vec<Entry>, context: SearchContext) {
        if self.entries.len() >= self.cap {
            self.evict_oldest_batch();
        }
        let now = Instant::now();
        self.entries.insert(query, CachedResult { results, context, inserted_at: now, last_touched: now });
    }

    fn evict_oldest_batch(&mut self) {
        let drop_count = ((self.entries.len() as f64) * self.evict_fraction).ceil() as usize;
        let mut keys: Vec<(String, Instant)> = self.entries.iter().map(|(k, v)| (k.clone(), v.last_touched)).collect();
        keys.sort_by_key(|(_, t)| *t);
        for (key, _) in keys.into_iter().take(drop_count.max(1)) {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn entry(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            is_directory: false,
            size: 0,
            mtime: 0,
            ctime: 0,
            extension: String::new(),
            mime: String::new(),
            priority: Priority::Medium,
            parent: ".".to_string(),
            full: name.to_string(),
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let mut cache = ContextualCache::new(Duration::from_secs(60), 100, 0.1);
        cache.put("abc".to_string(), vec![entry("abc.txt")], SearchContext::default());
        let (results, _) = cache.get("abc").unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let mut cache = ContextualCache::new(Duration::from_millis(1), 100, 0.1);
        cache.put("abc".to_string(), vec![entry("abc.txt")], SearchContext::default());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("abc").is_none());
    }

    #[test]
    fn eviction_caps_growth() {
        let mut cache = ContextualCache::new(Duration::from_secs(60), 4, 0.5);
        for i in 0..10 {
            cache.put(format!("q{i}"), vec![entry("a.txt")], SearchContext::default());
        }
        assert!(cache.len() <= 4);
    }
}
