//! Ranking function and fuzzy similarity (spec.md §4.2 "Ranking function").

use crate::types::Entry;

/// Normalized Levenshtein similarity, 1.0 for two empty strings. Backed by
/// `strsim::levenshtein` rather than a hand-rolled edit-distance routine.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (max_len as f64 - distance as f64) / max_len as f64
}

/// Match tag attached to a scored candidate, surfaced in contextual-cache
/// `context` counts (spec.md §4.2 "Contextual cache").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTag {
    Exact,
    Partial,
    Fuzzy,
    Content,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreSignals {
    pub access_count: u64,
    pub search_count: u64,
    pub now_unix: i64,
}

/// One scored candidate, ready for sorting.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Entry,
    pub score: f64,
    pub tag: MatchTag,
}

const DAY: i64 = 24 * 60 * 60;
const WEEK: i64 = 7 * DAY;

/// Score one candidate against `query_lower` (spec.md §4.2 ranking table).
pub fn score(entry: Entry, query_lower: &str, signals: ScoreSignals) -> ScoredEntry {
    let name_lower = entry.name.to_lowercase();
    let mut score = 0.0;
    let tag;

    if name_lower == query_lower {
        score += 1000.0;
        tag = MatchTag::Exact;
    } else if name_lower.starts_with(query_lower) {
        score += 800.0;
        tag = MatchTag::Partial;
    } else if name_lower.contains(query_lower) {
        score += 600.0;
        tag = MatchTag::Partial;
    } else {
        let sim = similarity(&name_lower, query_lower);
        if sim > 0.6 {
            score += 400.0 * sim;
            tag = MatchTag::Fuzzy;
        } else {
            score += 200.0;
            tag = MatchTag::Content;
        }
    }

    if entry.is_directory {
        score += 100.0;
    }
    score += 50.0 * entry.priority.as_u8() as f64;
    score += 10.0 * signals.access_count as f64;
    score += 20.0 * signals.search_count as f64;

    let age = (signals.now_unix - entry.mtime).max(0);
    if age < DAY {
        score += 100.0;
    } else if age < WEEK {
        score += 50.0;
    }

    let depth = entry.depth();
    if depth > 5 {
        score -= 10.0 * (depth as f64 - 5.0);
    }

    ScoredEntry { entry, score, tag }
}

pub fn sort_by_score_desc(scored: &mut [ScoredEntry]) {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn entry(name: &str, is_directory: bool, mtime: i64) -> Entry {
        Entry {
            name: name.to_string(),
            is_directory,
            size: 0,
            mtime,
            ctime: mtime,
            extension: String::new(),
            mime: String::new(),
            priority: Priority::Medium,
            parent: ".".to_string(),
            full: name.to_string(),
        }
    }

    #[test]
    fn similarity_identical_is_one() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn exact_match_outranks_contains_match() {
        let exact = score(entry("c.txt", false, 0), "c.txt", ScoreSignals { access_count: 0, search_count: 0, now_unix: 0 });
        let contains = score(entry("xc.txtx", false, 0), "c.txt", ScoreSignals { access_count: 0, search_count: 0, now_unix: 0 });
        assert!(exact.score > contains.score);
        assert_eq!(exact.tag, MatchTag::Exact);
    }

    #[test]
    fn deep_paths_are_penalized() {
        let mut shallow = entry("f.txt", false, 0);
        shallow.full = "f.txt".to_string();
        let mut deep = entry("f.txt", false, 0);
        deep.full = "a/b/c/d/e/f/f.txt".to_string();

        let signals = ScoreSignals { access_count: 0, search_count: 0, now_unix: 0 };
        let shallow_score = score(shallow, "f.txt", signals);
        let deep_score = score(deep, "f.txt", signals);
        assert!(shallow_score.score > deep_score.score);
    }
}
