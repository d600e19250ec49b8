//! Core data model: `Path`, `Entry`, `Priority`, `Tier` (spec.md §3).

use std::cmp::Ordering;
use std::fmt;

/// Normalize a root-relative path string: no trailing slash, no `..`, case
/// preserved. `"."` denotes the watched root itself.
pub fn normalize_rel_path(raw: &str) -> String {
    if raw.is_empty() || raw == "." {
        return ".".to_string();
    }
    let mut parts: Vec<&str> = Vec::new();
    for comp in raw.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// The basename of a root-relative path. `"."` has no basename (empty).
pub fn basename(path: &str) -> &str {
    if path == "." {
        return "";
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// The parent of a root-relative path. The parent of a top-level entry is `"."`.
pub fn parent_of(path: &str) -> String {
    if path == "." {
        return ".".to_string();
    }
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => ".".to_string(),
    }
}

/// Lower-cased, dot-included file extension. Empty for directories or
/// extensionless files.
pub fn extension_of(name: &str, is_directory: bool) -> String {
    if is_directory {
        return String::new();
    }
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[pos..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Best-effort MIME type derived from a lowercased extension. Not exhaustive;
/// content indexing is explicitly out of scope (spec.md Non-goals).
pub fn mime_for_extension(extension: &str) -> String {
    match extension {
        ".txt" | ".md" | ".log" => "text/plain",
        ".json" => "application/json",
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" | ".mjs" => "text/javascript",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".pdf" => "application/pdf",
        ".zip" => "application/zip",
        ".mp3" => "audio/mpeg",
        ".mp4" => "video/mp4",
        "" => "application/octet-stream",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Ordinal priority assigned by the AFT and stored on every tier record at
/// write time (spec.md §3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            4 => Priority::Critical,
            3 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// One of the three cache tiers over the same entry set (spec.md §3 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Meta,
    Content,
    Dir,
}

impl Tier {
    pub fn prefix(self) -> &'static str {
        match self {
            Tier::Meta => "meta",
            Tier::Content => "content",
            Tier::Dir => "dir",
        }
    }

    /// Key for a per-entry record in this tier (Meta/Content) or a
    /// per-parent hash (Dir).
    pub fn key(self, path: &str) -> String {
        format!("{}:{path}", self.prefix())
    }

    pub fn meta_key(self) -> String {
        format!("{}:meta", self.prefix())
    }
}

/// A single indexed filesystem record, the richest projection across all
/// three tiers (spec.md §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub extension: String,
    pub mime: String,
    pub priority: Priority,
    pub parent: String,
    pub full: String,
}

impl Entry {
    pub fn depth(&self) -> usize {
        if self.full == "." {
            0
        } else {
            self.full.matches('/').count() + 1
        }
    }
}

/// Sort order used by `List`: directories first, then by name
/// (case-insensitive, locale-aware — spec.md §4.1).
pub fn list_order(a: &Entry, b: &Entry) -> Ordering {
    match (a.is_directory, b.is_directory) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => alphanumeric_sort::compare_str(&a.name, &b.name),
    }
}

/// Sort order used by `Search` within the LMI: priority desc, then
/// directories first, then name asc (spec.md §4.1).
pub fn search_order(a: &Entry, b: &Entry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.is_directory, b.is_directory) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => Ordering::Equal,
        })
        .then_with(|| alphanumeric_sort::compare_str(&a.name, &b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dotdot_and_trailing() {
        assert_eq!(normalize_rel_path("a/b/../c"), "a/c");
        assert_eq!(normalize_rel_path(""), ".");
        assert_eq!(normalize_rel_path("."), ".");
        assert_eq!(normalize_rel_path("a/b/"), "a/b");
    }

    #[test]
    fn basename_and_parent() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("."), "");
        assert_eq!(parent_of("a/b/c.txt"), "a/b");
        assert_eq!(parent_of("c.txt"), ".");
        assert_eq!(parent_of("."), ".");
    }

    #[test]
    fn extension_lowercased() {
        assert_eq!(extension_of("Photo.JPG", false), ".jpg");
        assert_eq!(extension_of("noext", false), "");
        assert_eq!(extension_of(".hidden", false), "");
        assert_eq!(extension_of("dir", true), "");
    }

    #[test]
    fn priority_ordinals_roundtrip() {
        for p in [Priority::Low, Priority::Medium, Priority::High, Priority::Critical] {
            assert_eq!(Priority::from_u8(p.as_u8()), p);
        }
    }
}
