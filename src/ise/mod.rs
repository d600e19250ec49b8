//! Intelligent Search Engine (spec.md §4.2): ranked search over the three
//! LMI tiers with three latency profiles, query analytics, a contextual
//! cache, and smart precaching. Has no compile-time dependency on `lmi`
//! beyond the `KvStore` boundary both modules share.

pub mod analytics;
pub mod cache;
pub mod ranking;

use std::sync::Arc;
use std::time::{Instant as StdInstant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::aft::Aft;
use crate::config::Config;
use crate::error::Result;
use crate::events::{CoreEvent, EventSender};
use crate::kv::KvStore;
use crate::lmi::store;
use crate::types::{Entry, Priority, Tier};

use analytics::{Analytics, PathPriorityEntry, QueryHistoryEntry, SearchIdGenerator};
use cache::{ContextualCache, SearchContext};
use ranking::{MatchTag, ScoreSignals, ScoredEntry, score, sort_by_score_desc};

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Latency profile requested for one search (spec.md §4.2 "Modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Instant,
    Progressive,
    Comprehensive,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub limit: usize,
    pub session_id: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { mode: SearchMode::Instant, limit: 100, session_id: "default".to_string() }
    }
}

/// One incremental update during Progressive search (SPEC_FULL.md §9 DESIGN
/// NOTES: a streaming channel, not a mutable callback).
#[derive(Debug, Clone)]
pub struct SearchDelta {
    pub phase: String,
    pub new_results: Vec<Entry>,
    pub is_complete: bool,
}

pub struct SearchOutcome {
    pub results: Vec<Entry>,
    pub context: SearchContext,
    /// Which tiers actually held each result's path, keyed by `full` (spec.md
    /// §4.2 "Comprehensive" -- `tiers: set` on the merged record). Only
    /// Comprehensive mode populates this; Instant/Progressive leave it empty.
    pub entry_tiers: std::collections::HashMap<String, Vec<Tier>>,
}

/// Search Engine facade: owns the cache and analytics tables; reads tiers
/// through the shared `KvStore`, never through `lmi`'s writer.
pub struct SearchEngine {
    kv: Arc<dyn KvStore>,
    aft: Arc<Aft>,
    config: Arc<Config>,
    events: EventSender,
    cache: Mutex<ContextualCache>,
    analytics: Analytics,
    id_gen: SearchIdGenerator,
}

impl SearchEngine {
    pub fn new(kv: Arc<dyn KvStore>, aft: Arc<Aft>, config: Arc<Config>, events: EventSender) -> Self {
        Self {
            cache: Mutex::new(ContextualCache::new(
                config.contextual_cache_ttl,
                config.contextual_cache_cap,
                config.contextual_cache_evict_fraction,
            )),
            analytics: Analytics::new(config.session_timeout, config.path_priority_promote_threshold),
            id_gen: SearchIdGenerator::new(),
            kv,
            aft,
            config,
            events,
        }
    }

    /// Load persisted analytics tables written by a prior process
    /// (spec.md §4.2 "Persisted analytics"). Absence of any K/V row is not
    /// an error; this degrades to in-memory-only and logs a warning.
    pub async fn load_persisted(&self) {
        let mut cursor = 0u64;
        let mut loaded = 0u64;
        loop {
            let page = match self.kv.scan(cursor, "search:history:*", self.config.kv_scan_chunk).await {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("ise: failed to scan persisted history, falling back to in-memory: {e}");
                    break;
                }
            };
            for key in &page.keys {
                let query = key.trim_start_matches("search:history:").to_string();
                if let Ok(fields) = self.kv.hgetall(key).await {
                    if let Some(entry) = parse_history_fields(&fields) {
                        self.analytics.load_history(query, entry);
                        loaded += 1;
                    }
                }
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        cursor = 0;
        loop {
            let page = match self.kv.scan(cursor, "search:pattern:*", self.config.kv_scan_chunk).await {
                Ok(p) => p,
                Err(_) => break,
            };
            for key in &page.keys {
                let pattern = key.trim_start_matches("search:pattern:").to_string();
                if let Ok(Some(freq)) = self.kv.hget(key, "frequency").await {
                    if let Ok(freq) = freq.parse::<u64>() {
                        self.analytics.load_pattern(pattern, freq);
                    }
                }
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        cursor = 0;
        loop {
            let page = match self.kv.scan(cursor, "search:priority:*", self.config.kv_scan_chunk).await {
                Ok(p) => p,
                Err(_) => break,
            };
            for key in &page.keys {
                let path = key.trim_start_matches("search:priority:").to_string();
                if let Ok(fields) = self.kv.hgetall(key).await {
                    if let Some(entry) = parse_priority_fields(&fields) {
                        self.analytics.load_path_priority(path, entry);
                    }
                }
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        log::debug!("ise: loaded {loaded} persisted history rows");
    }

    /// Write history/pattern/path-priority tables to the K/V store (spec.md
    /// §4.2 "Persisted analytics", run every ~5 min by `ANALYTICS_SAVE`).
    pub async fn persist_analytics(&self) -> Result<()> {
        for (query, entry) in self.analytics.all_history() {
            store_history_fields(&*self.kv, &query, &entry).await?;
        }
        for (pattern, freq) in self.analytics.all_patterns() {
            self.kv.hset(&format!("search:pattern:{pattern}"), "frequency", &freq.to_string()).await?;
        }
        for (path, entry) in self.analytics.all_path_priorities() {
            store_priority_fields(&*self.kv, &path, &entry).await?;
        }
        self.analytics.evict_stale_sessions();
        Ok(())
    }

    /// Run one search to completion, per `opts.mode` (spec.md §2 `Search`).
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<SearchOutcome> {
        if query.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                context: SearchContext::default(),
                entry_tiers: std::collections::HashMap::new(),
            });
        }

        let started = StdInstant::now();
        let query_lower = query.to_lowercase();
        let search_id = self.id_gen.next(now_ms());

        let outcome = match opts.mode {
            SearchMode::Instant => self.search_instant(query, &query_lower, opts.limit).await?,
            SearchMode::Progressive => self.search_progressive(query, &query_lower, opts.limit, &search_id).await?,
            SearchMode::Comprehensive => self.search_comprehensive(query, &query_lower, opts.limit).await?,
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.analytics.record_search(query, &opts.session_id, elapsed_ms);
        for entry in &outcome.results {
            self.analytics.record_result_return(&entry.full);
        }

        Ok(outcome)
    }

    async fn search_instant(&self, query: &str, query_lower: &str, limit: usize) -> Result<SearchOutcome> {
        if let Some((results, context)) = self.cache.lock().await.get(query) {
            return Ok(SearchOutcome { results, context, entry_tiers: std::collections::HashMap::new() });
        }

        let cap = limit.min(self.config.instant_result_cap);
        let candidates = store::search_in_layer(&*self.kv, Tier::Meta, query_lower, cap, Priority::High).await?;
        let mut scored = self.score_all(candidates, query_lower);
        sort_by_score_desc(&mut scored);
        scored.truncate(cap);

        let results: Vec<Entry> = scored.iter().map(|s| s.entry.clone()).collect();
        let context = self.build_context(&scored, query);
        self.cache.lock().await.put(query.to_string(), results.clone(), context.clone());
        Ok(SearchOutcome { results, context, entry_tiers: std::collections::HashMap::new() })
    }

    async fn search_progressive(&self, query: &str, query_lower: &str, limit: usize, search_id: &str) -> Result<SearchOutcome> {
        let mut seen = std::collections::HashSet::new();
        let mut merged: Vec<Entry> = Vec::new();

        let meta = store::search_in_layer(&*self.kv, Tier::Meta, query_lower, limit, Priority::Low).await?;
        self.merge_unique(&mut merged, &mut seen, meta);
        self.emit_progress(search_id, "metadata", &merged, limit, false);

        if merged.len() < limit / 2 {
            let content = store::search_in_layer(&*self.kv, Tier::Content, query_lower, limit, Priority::Low).await?;
            self.merge_unique(&mut merged, &mut seen, content);
            self.emit_progress(search_id, "content", &merged, limit, false);
        }

        if merged.len() < (limit as f64 * 0.8) as usize {
            let dir = store::search_in_layer(&*self.kv, Tier::Dir, query_lower, limit, Priority::Low).await?;
            self.merge_unique(&mut merged, &mut seen, dir);
        }
        self.emit_progress(search_id, "directory", &merged, limit, true);

        let mut scored = self.score_all(merged, query_lower);
        sort_by_score_desc(&mut scored);
        scored.truncate(limit);

        let results: Vec<Entry> = scored.iter().map(|s| s.entry.clone()).collect();
        let context = self.build_context(&scored, query);
        self.cache.lock().await.put(query.to_string(), results.clone(), context.clone());
        Ok(SearchOutcome { results, context, entry_tiers: std::collections::HashMap::new() })
    }

    async fn search_comprehensive(&self, query: &str, query_lower: &str, limit: usize) -> Result<SearchOutcome> {
        let meta = store::search_in_layer(&*self.kv, Tier::Meta, query_lower, limit * 2, Priority::Low).await?;
        let content = store::search_in_layer(&*self.kv, Tier::Content, query_lower, limit * 2, Priority::Low).await?;
        let dir = store::search_in_layer(&*self.kv, Tier::Dir, query_lower, limit * 2, Priority::Low).await?;

        // Content and Dir records are both fully populated; Meta alone is
        // sparse. Merge keeping the richer record when a path appears twice,
        // while remembering every tier that actually held the path.
        let mut merged: std::collections::HashMap<String, Entry> = std::collections::HashMap::new();
        let mut tiers_seen: std::collections::HashMap<String, Vec<Tier>> = std::collections::HashMap::new();
        for (tier, batch) in [(Tier::Meta, meta), (Tier::Dir, dir), (Tier::Content, content)] {
            for entry in batch {
                tiers_seen.entry(entry.full.clone()).or_default().push(tier);
                merged.insert(entry.full.clone(), entry);
            }
        }

        let mut candidates: Vec<Entry> = merged.into_values().collect();
        candidates.truncate(limit * 2);

        let mut scored = self.score_all(candidates, query_lower);
        sort_by_score_desc(&mut scored);
        scored.truncate(limit);

        let results: Vec<Entry> = scored.iter().map(|s| s.entry.clone()).collect();
        let entry_tiers = results
            .iter()
            .filter_map(|e| tiers_seen.get(&e.full).map(|t| (e.full.clone(), t.clone())))
            .collect();
        let context = self.build_context(&scored, query);
        self.cache.lock().await.put(query.to_string(), results.clone(), context.clone());
        Ok(SearchOutcome { results, context, entry_tiers })
    }

    fn merge_unique(&self, merged: &mut Vec<Entry>, seen: &mut std::collections::HashSet<String>, batch: Vec<Entry>) {
        for entry in batch {
            if seen.insert(entry.full.clone()) {
                merged.push(entry);
            }
        }
    }

    fn emit_progress(&self, search_id: &str, phase: &str, current: &[Entry], _total: usize, is_complete: bool) {
        let delta = SearchDelta { phase: phase.to_string(), new_results: current.to_vec(), is_complete };
        let _ = self.events.send(CoreEvent::SearchProgress { search_id: search_id.to_string(), delta });
    }

    fn score_all(&self, candidates: Vec<Entry>, query_lower: &str) -> Vec<ScoredEntry> {
        let now = now_unix();
        candidates
            .into_iter()
            .map(|entry| {
                let access_count = self.aft.access_count(&entry.full);
                let search_count = self.analytics.path_priority(&entry.full).map(|p| p.search_count).unwrap_or(0);
                score(entry, query_lower, ScoreSignals { access_count, search_count, now_unix: now })
            })
            .collect()
    }

    /// Build the per-search context: match-kind counts plus suggestions
    /// derived from frequent unmatched patterns and similar past queries
    /// (spec.md §4.2 "Contextual cache").
    fn build_context(&self, scored: &[ScoredEntry], query: &str) -> SearchContext {
        let mut context = SearchContext::default();
        for s in scored {
            match s.tag {
                MatchTag::Exact => context.exact_count += 1,
                MatchTag::Partial => context.partial_count += 1,
                MatchTag::Fuzzy => context.fuzzy_count += 1,
                MatchTag::Content => {}
            }
            if s.entry.is_directory {
                context.directory_count += 1;
            } else {
                context.file_count += 1;
            }
        }

        let mut suggestions = Vec::new();
        for (pattern, freq) in self.analytics.all_patterns() {
            if freq <= 5 {
                continue;
            }
            if let Some(ext) = pattern.strip_prefix("ext:") {
                let suffix = format!(".{ext}");
                if !query.ends_with(&suffix) {
                    suggestions.push(format!("{query}{suffix}"));
                }
            }
        }
        suggestions.extend(self.analytics.similar_history_queries(query, 0.7, self.config.max_suggestions));
        suggestions.truncate(self.config.max_suggestions);
        context.suggestions = suggestions;
        context
    }

    /// Candidate directories to `RefreshPath`, derived from frequently
    /// searched or high-priority paths (spec.md §4.2 "Smart precache").
    pub fn smart_precache_candidates(&self) -> Vec<String> {
        let mut paths = self.analytics.precache_candidates(self.config.precache_search_count_threshold, Priority::High);

        // High-frequency patterns bias priority, not which directories get
        // enumerated (spec.md §4.2 "smartPreCache"): a path whose extension
        // pattern is searched often sorts ahead so it survives the cap.
        paths.sort_by_key(|path| std::cmp::Reverse(self.pattern_bias(path)));

        let mut seen = std::collections::HashSet::new();
        let mut dirs: Vec<String> = Vec::new();
        for path in paths {
            let dir = crate::types::parent_of(&path);
            if seen.insert(dir.clone()) {
                dirs.push(dir);
            }
        }
        dirs.truncate(self.config.precache_dir_cap);
        dirs
    }

    /// Pattern-frequency bias for one candidate path: its extension pattern's
    /// observed frequency, or 0 if under the threshold or extensionless.
    fn pattern_bias(&self, path: &str) -> u64 {
        let Some(ext) = std::path::Path::new(path).extension().and_then(|e| e.to_str()) else {
            return 0;
        };
        let frequency = self.analytics.pattern_frequency(&format!("ext:{ext}"));
        if frequency > self.config.precache_pattern_frequency_threshold as u64 {
            frequency
        } else {
            0
        }
    }

    pub fn touch_access(&self, path: &str) {
        self.analytics.record_access(path);
    }
}

async fn store_history_fields(kv: &dyn KvStore, query: &str, entry: &QueryHistoryEntry) -> Result<()> {
    kv.hset_many(
        &format!("search:history:{query}"),
        &[
            ("count".to_string(), entry.count.to_string()),
            ("last_search".to_string(), entry.last_search.to_string()),
            ("avg_response_time_ms".to_string(), entry.avg_response_time_ms.to_string()),
            ("patterns".to_string(), entry.patterns.join(",")),
        ],
    )
    .await
}

fn parse_history_fields(fields: &std::collections::HashMap<String, String>) -> Option<QueryHistoryEntry> {
    Some(QueryHistoryEntry {
        count: fields.get("count")?.parse().ok()?,
        last_search: fields.get("last_search")?.parse().ok()?,
        avg_response_time_ms: fields.get("avg_response_time_ms")?.parse().ok()?,
        patterns: fields.get("patterns").map(|p| p.split(',').filter(|s| !s.is_empty()).map(String::from).collect()).unwrap_or_default(),
    })
}

async fn store_priority_fields(kv: &dyn KvStore, path: &str, entry: &PathPriorityEntry) -> Result<()> {
    kv.hset_many(
        &format!("search:priority:{path}"),
        &[
            ("access_count".to_string(), entry.access_count.to_string()),
            ("search_count".to_string(), entry.search_count.to_string()),
            ("priority".to_string(), entry.priority.as_u8().to_string()),
        ],
    )
    .await
}

fn parse_priority_fields(fields: &std::collections::HashMap<String, String>) -> Option<PathPriorityEntry> {
    Some(PathPriorityEntry {
        access_count: fields.get("access_count")?.parse().ok()?,
        search_count: fields.get("search_count")?.parse().ok()?,
        priority: fields.get("priority").and_then(|v| v.parse::<u8>().ok()).map(Priority::from_u8).unwrap_or(Priority::Medium),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::lmi::store::write_all_tiers;

    fn sample_entry(full: &str, name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            is_directory: false,
            size: 1,
            mtime: now_unix(),
            ctime: now_unix(),
            extension: ".txt".to_string(),
            mime: "text/plain".to_string(),
            priority: Priority::Critical,
            parent: crate::types::parent_of(full),
            full: full.to_string(),
        }
    }

    async fn engine_with(entries: &[Entry]) -> (SearchEngine, Arc<dyn KvStore>) {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        for e in entries {
            write_all_tiers(&*kv, e, e.mtime).await.unwrap();
        }
        let aft = Arc::new(Aft::new(1000));
        let config = Arc::new(Config::default());
        let (tx, _rx) = crate::events::channel();
        (SearchEngine::new(kv.clone(), aft, config, tx), kv)
    }

    #[tokio::test]
    async fn smart_precache_biases_toward_high_frequency_pattern() {
        let (engine, _kv) = engine_with(&[
            sample_entry("a/report.pdf", "report.pdf"),
            sample_entry("b/notes.txt", "notes.txt"),
        ])
        .await;

        for _ in 0..11 {
            engine.analytics.record_result_return("a/report.pdf");
            engine.analytics.record_result_return("b/notes.txt");
        }
        for _ in 0..6 {
            engine.analytics.record_search("report.pdf", "s1", 1.0);
        }

        let mut config = Config::default();
        config.precache_dir_cap = 1;
        let engine = SearchEngine { config: Arc::new(config), ..engine };

        let dirs = engine.smart_precache_candidates();
        assert_eq!(dirs, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn instant_search_finds_exact_match() {
        let (engine, _kv) = engine_with(&[sample_entry("report.txt", "report.txt")]).await;
        let outcome = engine.search("report.txt", SearchOptions { mode: SearchMode::Instant, limit: 10, session_id: "s1".into() }).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.context.exact_count, 1);
    }

    #[tokio::test]
    async fn instant_search_second_call_hits_cache() {
        let (engine, kv) = engine_with(&[sample_entry("report.txt", "report.txt")]).await;
        let opts = || SearchOptions { mode: SearchMode::Instant, limit: 10, session_id: "s1".into() };
        engine.search("report", opts()).await.unwrap();
        kv.flushdb().await.unwrap();
        let second = engine.search("report", opts()).await.unwrap();
        assert_eq!(second.results.len(), 1);
    }

    #[tokio::test]
    async fn comprehensive_search_merges_all_tiers() {
        let (engine, _kv) = engine_with(&[sample_entry("sub/report.txt", "report.txt")]).await;
        let outcome = engine
            .search("report", SearchOptions { mode: SearchMode::Comprehensive, limit: 10, session_id: "s1".into() })
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        let tiers = outcome.entry_tiers.get("sub/report.txt").expect("tiers recorded for merged entry");
        assert!(tiers.contains(&Tier::Meta));
        assert!(tiers.contains(&Tier::Content));
        assert!(tiers.contains(&Tier::Dir));
    }

    #[tokio::test]
    async fn empty_query_returns_no_results_without_kv_traffic() {
        let (engine, kv) = engine_with(&[sample_entry("report.txt", "report.txt")]).await;
        let outcome = engine.search("", SearchOptions::default()).await.unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.entry_tiers.is_empty());
        // The engine never touched the store: everything written by engine_with is still intact.
        assert!(kv.hgetall("meta:report.txt").await.unwrap().contains_key("name"));
    }

    #[tokio::test]
    async fn persist_and_reload_history_roundtrips() {
        let (engine, kv) = engine_with(&[sample_entry("report.txt", "report.txt")]).await;
        engine.search("report.txt", SearchOptions { mode: SearchMode::Instant, limit: 10, session_id: "s1".into() }).await.unwrap();
        engine.persist_analytics().await.unwrap();

        let aft = Arc::new(Aft::new(1000));
        let config = Arc::new(Config::default());
        let (tx, _rx) = crate::events::channel();
        let reloaded = SearchEngine::new(kv.clone(), aft, config, tx);
        reloaded.load_persisted().await;
        assert!(reloaded.analytics.history_entry("report.txt").is_some());
    }
}
