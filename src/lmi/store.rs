//! Tier key shapes and read/write helpers over the `KvStore` trait
//! (spec.md §3 table, §6 persistent state layout).

use std::collections::HashMap;

use crate::error::Result;
use crate::kv::KvStore;
use crate::types::{Entry, Priority, Tier};

/// Hash-field representation of an `Entry` inside the `meta:<path>` tier.
/// `last_access` comes from the AFT, not the filesystem's mtime -- those are
/// distinct fields (spec.md §3, §4.4) and conflating them would make a
/// never-opened-but-recently-edited file look recently accessed.
fn meta_fields(entry: &Entry, last_access: i64) -> Vec<(String, String)> {
    vec![
        ("name".to_string(), entry.name.clone()),
        ("is_directory".to_string(), entry.is_directory.to_string()),
        ("exists".to_string(), "true".to_string()),
        ("priority".to_string(), entry.priority.as_u8().to_string()),
        ("last_access".to_string(), last_access.to_string()),
    ]
}

/// Hash-field representation of an `Entry` inside the `content:<path>` tier.
fn content_fields(entry: &Entry) -> Vec<(String, String)> {
    vec![
        ("name".to_string(), entry.name.clone()),
        ("is_directory".to_string(), entry.is_directory.to_string()),
        ("size".to_string(), entry.size.to_string()),
        ("mtime".to_string(), entry.mtime.to_string()),
        ("ctime".to_string(), entry.ctime.to_string()),
        ("extension".to_string(), entry.extension.clone()),
        ("mime".to_string(), entry.mime.clone()),
        ("priority".to_string(), entry.priority.as_u8().to_string()),
    ]
}

fn entry_json(entry: &Entry) -> String {
    serde_json::to_string(entry).unwrap_or_default()
}

fn entry_from_json(full: &str, raw: &str) -> Option<Entry> {
    serde_json::from_str::<Entry>(raw).ok().or_else(|| {
        log::debug!("lmi/store: failed to parse dir-tier record for {full}");
        None
    })
}

fn fields_to_entry(full: &str, fields: &HashMap<String, String>, rich: bool) -> Option<Entry> {
    let name = fields.get("name")?.clone();
    let is_directory = fields.get("is_directory").map(|v| v == "true").unwrap_or(false);
    let priority = fields
        .get("priority")
        .and_then(|v| v.parse::<u8>().ok())
        .map(Priority::from_u8)
        .unwrap_or(Priority::Medium);
    let parent = crate::types::parent_of(full);

    if rich {
        let size = fields.get("size").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mtime = fields.get("mtime").and_then(|v| v.parse().ok()).unwrap_or(0);
        let ctime = fields.get("ctime").and_then(|v| v.parse().ok()).unwrap_or(0);
        let extension = fields.get("extension").cloned().unwrap_or_default();
        let mime = fields.get("mime").cloned().unwrap_or_default();
        Some(Entry {
            name,
            is_directory,
            size,
            mtime,
            ctime,
            extension,
            mime,
            priority,
            parent,
            full: full.to_string(),
        })
    } else {
        Some(Entry {
            name,
            is_directory,
            size: 0,
            mtime: 0,
            ctime: 0,
            extension: String::new(),
            mime: String::new(),
            priority,
            parent,
            full: full.to_string(),
        })
    }
}

/// Write `entry` into the Meta tier. `last_access` should come from the AFT
/// (`Aft::last_access`, falling back to the entry's own mtime the first time
/// a path is indexed and has never been touched).
pub async fn write_meta(kv: &dyn KvStore, entry: &Entry, last_access: i64) -> Result<()> {
    kv.hset_many(&Tier::Meta.key(&entry.full), &meta_fields(entry, last_access)).await
}

/// Write `entry` into the Content tier.
pub async fn write_content(kv: &dyn KvStore, entry: &Entry) -> Result<()> {
    kv.hset_many(&Tier::Content.key(&entry.full), &content_fields(entry)).await
}

/// Write `entry` as a field of its parent's `dir:<parent>` hash.
pub async fn write_dir_field(kv: &dyn KvStore, entry: &Entry) -> Result<()> {
    kv.hset(&Tier::Dir.key(&entry.parent), &entry.name, &entry_json(entry)).await
}

/// Write `entry` into all three tiers, Meta→Content→Dir (spec.md §5 ordering).
pub async fn write_all_tiers(kv: &dyn KvStore, entry: &Entry, last_access: i64) -> Result<()> {
    write_meta(kv, entry, last_access).await?;
    write_content(kv, entry).await?;
    write_dir_field(kv, entry).await?;
    Ok(())
}

/// Remove `path` from Meta and Content, and drop its field from the parent's
/// Dir hash (spec.md §4.1 `unlink`).
pub async fn delete_entry(kv: &dyn KvStore, path: &str, parent: &str, name: &str) -> Result<()> {
    kv.del(&Tier::Meta.key(path)).await?;
    kv.del(&Tier::Content.key(path)).await?;
    kv.hdel(&Tier::Dir.key(parent), name).await?;
    Ok(())
}

/// Remove a whole subtree: `dir:<path>` itself, every `<tier>:<path>/*` key
/// across all three tiers, and the field inside the parent's Dir hash
/// (spec.md §4.1 `unlinkDir`).
pub async fn delete_subtree(kv: &dyn KvStore, path: &str, parent: &str, name: &str) -> Result<()> {
    kv.del(&Tier::Dir.key(path)).await?;

    for tier in [Tier::Meta, Tier::Content] {
        let prefix = format!("{}:{path}/", tier.prefix());
        let mut cursor = 0u64;
        loop {
            let page = kv.scan(cursor, &format!("{prefix}*"), 100).await?;
            for key in &page.keys {
                kv.del(key).await?;
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
    }

    // Descendant dir: hashes (dir:<path>/...) are separate keys from dir:<path> itself.
    let dir_prefix = format!("{}:{path}/", Tier::Dir.prefix());
    let mut cursor = 0u64;
    loop {
        let page = kv.scan(cursor, &format!("{dir_prefix}*"), 100).await?;
        for key in &page.keys {
            kv.del(key).await?;
        }
        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }

    kv.del(&Tier::Meta.key(path)).await?;
    kv.del(&Tier::Content.key(path)).await?;
    kv.hdel(&Tier::Dir.key(parent), name).await?;
    Ok(())
}

/// `List`'s Dir-tier read: every child of `parent`, richest available form.
pub async fn read_dir_tier(kv: &dyn KvStore, parent: &str) -> Result<Vec<Entry>> {
    let fields = kv.hgetall(&Tier::Dir.key(parent)).await?;
    Ok(fields
        .iter()
        .filter_map(|(name, raw)| {
            let full = if parent == "." { name.clone() } else { format!("{parent}/{name}") };
            entry_from_json(&full, raw)
        })
        .collect())
}

/// Fallback read used by `List` when the Dir tier has no key yet (only
/// during initial indexing, per spec.md §4.1).
pub async fn read_content_tier_children(kv: &dyn KvStore, parent: &str) -> Result<Vec<Entry>> {
    read_tier_children(kv, Tier::Content, parent, true).await
}

pub async fn read_meta_tier_children(kv: &dyn KvStore, parent: &str) -> Result<Vec<Entry>> {
    read_tier_children(kv, Tier::Meta, parent, false).await
}

async fn read_tier_children(kv: &dyn KvStore, tier: Tier, parent: &str, rich: bool) -> Result<Vec<Entry>> {
    let prefix = format!("{}:", tier.prefix());
    let mut out = Vec::new();
    let mut cursor = 0u64;
    loop {
        let page = kv.scan(cursor, &format!("{prefix}*"), 100).await?;
        for key in &page.keys {
            let full = key.trim_start_matches(&prefix);
            if crate::types::parent_of(full) != parent {
                continue;
            }
            let fields = kv.hgetall(key).await?;
            if let Some(entry) = fields_to_entry(full, &fields, rich) {
                out.push(entry);
            }
        }
        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }
    Ok(out)
}

/// `Stat`'s Content-then-Meta read.
pub async fn read_stat(kv: &dyn KvStore, path: &str) -> Result<Option<Entry>> {
    let content = kv.hgetall(&Tier::Content.key(path)).await?;
    if !content.is_empty() {
        return Ok(fields_to_entry(path, &content, true));
    }
    let meta = kv.hgetall(&Tier::Meta.key(path)).await?;
    if !meta.is_empty() {
        return Ok(fields_to_entry(path, &meta, false));
    }
    Ok(None)
}

/// `searchInLayer`: substring match on basename within one tier, cursor-paginated.
pub async fn search_in_layer(
    kv: &dyn KvStore,
    tier: Tier,
    query_lower: &str,
    limit: usize,
    min_priority: Priority,
) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut cursor = 0u64;

    match tier {
        Tier::Dir => {
            loop {
                let page = kv.scan(cursor, "dir:*", 100).await?;
                for key in &page.keys {
                    let parent = key.trim_start_matches("dir:");
                    let fields = kv.hgetall(key).await?;
                    for (name, raw) in &fields {
                        if out.len() >= limit {
                            return Ok(out);
                        }
                        if !name.to_lowercase().contains(query_lower) {
                            continue;
                        }
                        let full = if parent == "." { name.clone() } else { format!("{parent}/{name}") };
                        if let Some(entry) = entry_from_json(&full, raw) {
                            if entry.priority >= min_priority {
                                out.push(entry);
                            }
                        }
                    }
                }
                cursor = page.cursor;
                if cursor == 0 || out.len() >= limit {
                    break;
                }
            }
        }
        Tier::Meta | Tier::Content => {
            let prefix = format!("{}:", tier.prefix());
            let rich = matches!(tier, Tier::Content);
            loop {
                let page = kv.scan(cursor, &format!("{prefix}*"), 100).await?;
                for key in &page.keys {
                    if out.len() >= limit {
                        return Ok(out);
                    }
                    let full = key.trim_start_matches(&prefix);
                    let name = crate::types::basename(full);
                    if !name.to_lowercase().contains(query_lower) {
                        continue;
                    }
                    let fields = kv.hgetall(key).await?;
                    if let Some(entry) = fields_to_entry(full, &fields, rich) {
                        if entry.priority >= min_priority {
                            out.push(entry);
                        }
                    }
                }
                cursor = page.cursor;
                if cursor == 0 || out.len() >= limit {
                    break;
                }
            }
        }
    }

    Ok(out)
}

/// Index-version metadata stored at `<tier>:meta` (spec.md §6).
pub async fn write_tier_version_meta(kv: &dyn KvStore, tier: Tier, created: i64, version: u32, total_items: u64) -> Result<()> {
    kv.hset_many(
        &tier.meta_key(),
        &[
            ("created".to_string(), created.to_string()),
            ("version".to_string(), version.to_string()),
            ("total_items".to_string(), total_items.to_string()),
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;

    fn sample_entry(full: &str, parent: &str, name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            is_directory: false,
            size: 10,
            mtime: 100,
            ctime: 100,
            extension: ".txt".to_string(),
            mime: "text/plain".to_string(),
            priority: Priority::Medium,
            parent: parent.to_string(),
            full: full.to_string(),
        }
    }

    #[tokio::test]
    async fn write_and_read_stat_roundtrip() {
        let kv = InMemoryKvStore::new();
        let entry = sample_entry("a.txt", ".", "a.txt");
        write_all_tiers(&kv, &entry, 100).await.unwrap();

        let found = read_stat(&kv, "a.txt").await.unwrap().unwrap();
        assert_eq!(found.size, 10);
        assert_eq!(found.name, "a.txt");
    }

    #[tokio::test]
    async fn dir_tier_lists_children() {
        let kv = InMemoryKvStore::new();
        let entry = sample_entry("sub/c.txt", "sub", "c.txt");
        write_all_tiers(&kv, &entry, 100).await.unwrap();

        let children = read_dir_tier(&kv, "sub").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].full, "sub/c.txt");
    }

    #[tokio::test]
    async fn delete_entry_removes_from_all_tiers() {
        let kv = InMemoryKvStore::new();
        let entry = sample_entry("a.txt", ".", "a.txt");
        write_all_tiers(&kv, &entry, 100).await.unwrap();
        delete_entry(&kv, "a.txt", ".", "a.txt").await.unwrap();

        assert!(read_stat(&kv, "a.txt").await.unwrap().is_none());
        assert!(read_dir_tier(&kv, ".").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_subtree_removes_nested_keys() {
        let kv = InMemoryKvStore::new();
        let dir_entry = Entry {
            name: "sub".to_string(),
            is_directory: true,
            size: 0,
            mtime: 0,
            ctime: 0,
            extension: String::new(),
            mime: String::new(),
            priority: Priority::Medium,
            parent: ".".to_string(),
            full: "sub".to_string(),
        };
        let child = sample_entry("sub/c.txt", "sub", "c.txt");
        write_all_tiers(&kv, &dir_entry, 100).await.unwrap();
        write_all_tiers(&kv, &child, 100).await.unwrap();

        delete_subtree(&kv, "sub", ".", "sub").await.unwrap();

        assert!(read_stat(&kv, "sub/c.txt").await.unwrap().is_none());
        assert!(read_dir_tier(&kv, ".").await.unwrap().is_empty());
        assert!(kv.hgetall("dir:sub").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn meta_tier_last_access_is_distinct_from_mtime() {
        let kv = InMemoryKvStore::new();
        let entry = sample_entry("a.txt", ".", "a.txt");
        write_meta(&kv, &entry, 999).await.unwrap();

        let fields = kv.hgetall("meta:a.txt").await.unwrap();
        assert_eq!(fields.get("last_access").unwrap(), "999");
        assert_ne!(fields.get("last_access").unwrap(), &entry.mtime.to_string());
    }

    #[tokio::test]
    async fn search_in_layer_matches_substring() {
        let kv = InMemoryKvStore::new();
        write_all_tiers(&kv, &sample_entry("sub/c.txt", "sub", "c.txt"), 100).await.unwrap();
        write_all_tiers(&kv, &sample_entry("xc.txtx", ".", "xc.txtx"), 100).await.unwrap();

        let results = search_in_layer(&kv, Tier::Content, "c.txt", 100, Priority::Low).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
