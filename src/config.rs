//! Process-wide configuration.
//!
//! The teacher's module-level constants (`EXCLUDED_PREFIXES`, batch sizes,
//! debounce durations) become one immutable value here, constructed once
//! and threaded via `Arc<Config>` into every component — see DESIGN NOTES
//! in SPEC_FULL.md ("Global singletons / module state").

use std::time::Duration;

/// Budget for one phase of the progressive initial scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanPhaseBudget {
    pub slice: Duration,
    pub yield_every: u32,
}

/// Tunables for the whole core. Construct once with [`Config::default`] and
/// override only what the host application needs to change.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string for the K/V store (e.g. `redis://127.0.0.1/`).
    pub kv_url: String,

    // ── LMI ──────────────────────────────────────────────────────────
    /// Phase 1 (Meta), phase 2 (Content), phase 3 (Dir) scan budgets.
    pub scan_phases: [ScanPhaseBudget; 3],
    /// Watcher write-stability debounce.
    pub watcher_debounce: Duration,
    /// Directory names ignored by the watcher at any depth.
    pub watcher_ignore_names: Vec<String>,
    /// Glob-ish suffixes ignored by the watcher (e.g. `.log`).
    pub watcher_ignore_suffixes: Vec<String>,
    /// Page size used by `searchInLayer`'s cursor-paginated K/V scan.
    pub kv_scan_chunk: u32,

    // ── ISE ──────────────────────────────────────────────────────────
    /// Cap on results returned by Instant mode.
    pub instant_result_cap: usize,
    /// Contextual cache TTL.
    pub contextual_cache_ttl: Duration,
    /// Contextual cache max entries before LRU eviction kicks in.
    pub contextual_cache_cap: usize,
    /// Fraction of the cache dropped (oldest first) once `contextual_cache_cap` is hit.
    pub contextual_cache_evict_fraction: f64,
    /// Session inactivity timeout for query-analytics session tracking.
    pub session_timeout: Duration,
    /// `search_count` threshold above which ISE path priority auto-promotes.
    pub path_priority_promote_threshold: u32,
    /// How often analytics tables are persisted to the K/V store.
    pub analytics_persist_interval: Duration,
    /// Smart precache: `search_count` threshold for candidate directories.
    pub precache_search_count_threshold: u32,
    /// Smart precache: cap on directories refreshed per invocation.
    pub precache_dir_cap: usize,
    /// Smart precache: pattern-frequency threshold biasing priority.
    pub precache_pattern_frequency_threshold: u32,
    /// Max suggestions attached to contextual-cache context.
    pub max_suggestions: usize,

    // ── CS ───────────────────────────────────────────────────────────
    /// Maximum concurrently running background tasks.
    pub max_concurrent_tasks: usize,
    /// Maximum pending queue length before overflow drops the lowest priority task.
    pub max_queue_len: usize,
    /// Default per-task retry budget.
    pub default_max_retries: u32,
    /// Default per-task timeout.
    pub default_task_timeout: Duration,
    /// Dispatcher tick interval.
    pub dispatch_tick: Duration,
    /// Resource-sampling tick interval.
    pub resource_sample_tick: Duration,
    /// Memory ratio above which a `MEMORY_OPTIMIZE` task auto-enqueues.
    pub memory_pressure_high: f64,
    /// Memory ratio above which the dispatcher refuses to start new tasks.
    pub memory_pressure_throttle: f64,
    /// Completed-task store TTL.
    pub completed_task_ttl: Duration,
    /// Completed-task store prune interval.
    pub completed_task_prune_interval: Duration,
    /// Completed-task store max entries.
    pub completed_task_cap: usize,
    /// Interval on which an `ANALYTICS_SAVE` task is auto-enqueued.
    pub analytics_save_interval: Duration,

    // ── AFT ──────────────────────────────────────────────────────────
    /// Max tracked paths before LRU eviction by `last_access`.
    pub aft_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_url: "redis://127.0.0.1/".to_string(),

            scan_phases: [
                ScanPhaseBudget {
                    slice: Duration::from_millis(50),
                    yield_every: 100,
                },
                ScanPhaseBudget {
                    slice: Duration::from_millis(100),
                    yield_every: 50,
                },
                ScanPhaseBudget {
                    slice: Duration::from_millis(200),
                    yield_every: 25,
                },
            ],
            watcher_debounce: Duration::from_millis(200),
            watcher_ignore_names: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "temp".to_string(),
                "dist".to_string(),
            ],
            watcher_ignore_suffixes: vec![".log".to_string()],
            kv_scan_chunk: 100,

            instant_result_cap: 100,
            contextual_cache_ttl: Duration::from_secs(5 * 60),
            contextual_cache_cap: 10_000,
            contextual_cache_evict_fraction: 0.10,
            session_timeout: Duration::from_secs(2 * 60 * 60),
            path_priority_promote_threshold: 5,
            analytics_persist_interval: Duration::from_secs(5 * 60),
            precache_search_count_threshold: 10,
            precache_dir_cap: 20,
            precache_pattern_frequency_threshold: 5,
            max_suggestions: 5,

            max_concurrent_tasks: 3,
            max_queue_len: 1000,
            default_max_retries: 3,
            default_task_timeout: Duration::from_secs(30),
            dispatch_tick: Duration::from_millis(100),
            resource_sample_tick: Duration::from_secs(5),
            memory_pressure_high: 0.90,
            memory_pressure_throttle: 0.85,
            completed_task_ttl: Duration::from_secs(24 * 60 * 60),
            completed_task_prune_interval: Duration::from_secs(30),
            completed_task_cap: 100,
            analytics_save_interval: Duration::from_secs(5 * 60),

            aft_cap: 50_000,
        }
    }
}

/// Directory names that are always ignored by the watcher regardless of
/// `Config::watcher_ignore_names`: dotfiles at any depth.
pub fn is_dotfile(name: &str) -> bool {
    name.starts_with('.')
}
