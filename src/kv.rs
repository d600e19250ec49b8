//! Key/value store boundary consumed by the LMI and ISE (spec.md §6). The
//! verbs named there (`hset`/`hget`/`hdel`/`del`/`scan`/`flushdb`) are
//! literally the Redis hash/scan API, so the production implementation is a
//! thin `redis` wrapper; tests run against an in-memory stand-in instead of
//! a live server.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::Result;

/// Cursor-paginated key scan result.
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// The K/V boundary. All methods are async since the production
/// implementation crosses a network connection; the in-memory test
/// implementation simply never awaits anything interesting.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Cursor-paginated iteration over keys matching `pattern`. Implementations
    /// MUST NOT enumerate the whole keyspace in one blocking call.
    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage>;
    async fn flushdb(&self) -> Result<()>;
}

/// Production implementation backed by a multiplexed `redis` connection
/// manager (spec.md §5: "I/O to the K/V store should be multiplexed on a
/// single connection or a small pool").
pub struct RedisKvStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor: next_cursor, keys })
    }

    async fn flushdb(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory implementation used by tests and by ISE's "degrade to
/// in-memory" fallback (spec.md §4.2/§7: K/V errors after init are
/// non-fatal).
#[derive(Default)]
pub struct InMemoryKvStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        let entry = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let hashes = self.hashes.lock().unwrap();
        Ok(hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let hashes = self.hashes.lock().unwrap();
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        if let Some(h) = hashes.get_mut(key) {
            h.remove(field);
            if h.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.remove(key);
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage> {
        let hashes = self.hashes.lock().unwrap();
        let mut keys: Vec<&String> = hashes.keys().collect();
        keys.sort();
        let prefix = pattern.trim_end_matches('*');
        let matching: Vec<String> = keys.into_iter().filter(|k| k.starts_with(prefix)).cloned().collect();

        let start = cursor as usize;
        let end = (start + count as usize).min(matching.len());
        let page = matching[start.min(matching.len())..end].to_vec();
        let next_cursor = if end >= matching.len() { 0 } else { end as u64 };
        Ok(ScanPage { cursor: next_cursor, keys: page })
    }

    async fn flushdb(&self) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.clear();
        Ok(())
    }
}
