//! Durable, sqlite-backed cache backend (§4.3).
//!
//! Entries survive across invocations, so expiry is stamped with
//! wall-clock time (`SystemTime`) rather than `Instant`. Grounded in the
//! teacher's `Store`: a single connection behind a lock, a `db.db` file
//! under the cache root, schema created on first open.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;

use super::{Cache, CacheKey, CacheStats};
use crate::hook::HookResult;

/// Default TTL reported in `stats()` for caches constructed without an
/// explicit one via [`SqliteCache::with_default_ttl`].
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Cache backend persisted to a sqlite database, for hook results that
/// should survive across separate orchestrator invocations.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    default_ttl: Duration,
}

impl SqliteCache {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            default_ttl: DEFAULT_TTL,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE cache_entries (
                key TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_ttl: DEFAULT_TTL,
        })
    }

    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Option<HookResult> {
        let conn = self.conn.lock();
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT result_json, inserted_at, ttl_secs FROM cache_entries WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        let Some((result_json, inserted_at, ttl_secs)) = row else {
            return None;
        };

        let expired = now_secs().saturating_sub(inserted_at as u64) >= ttl_secs as u64;
        if expired {
            let _ = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key.as_str()]);
            return None;
        }

        match serde_json::from_str(&result_json) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "discarding unparseable cache entry");
                None
            }
        }
    }

    async fn put(&self, key: CacheKey, result: HookResult, ttl: Duration) {
        let Ok(result_json) = serde_json::to_string(&result) else {
            warn!(key = %key, "failed to serialize hook result, not caching");
            return;
        };

        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, result_json, inserted_at, ttl_secs) VALUES (?1, ?2, ?3, ?4)",
            params![key.as_str(), result_json, now_secs() as i64, ttl.as_secs() as i64],
        ) {
            warn!(key = %key, error = %e, "failed to write cache entry");
        }
    }

    async fn stats(&self) -> CacheStats {
        let conn = self.conn.lock();
        let now = now_secs() as i64;

        let total: usize = conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize;
        let expired: usize = conn
            .query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE inserted_at + ttl_secs <= ?1",
                params![now],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0) as usize;

        CacheStats {
            total,
            active: total - expired,
            expired,
            capacity: None,
            default_ttl: self.default_ttl,
        }
    }

    async fn clear(&self) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute("DELETE FROM cache_entries", []) {
            warn!(error = %e, "failed to clear cache entries");
        }
    }
}

/// Default location for the persistent cache, mirroring the teacher's
/// `PRE_COMMIT_HOME`-or-XDG-cache-dir resolution.
pub fn default_cache_path() -> PathBuf {
    if let Some(path) = std::env::var_os("HOOKCRAFT_CACHE_HOME") {
        return PathBuf::from(path).join("db.db");
    }
    if let Ok(strategy) = etcetera::choose_base_strategy() {
        return strategy.cache_dir().join("hookcraft").join("db.db");
    }
    Path::new(".hookcraft-cache").join("db.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookStage;

    fn key(name: &str) -> CacheKey {
        CacheKey::compute(name, &serde_json::json!({}), &[])
    }

    #[tokio::test]
    async fn round_trips_through_sqlite() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let k = key("bandit");
        assert!(cache.get(&k).await.is_none());

        let result = HookResult::passed("bandit", HookStage::Comprehensive, Duration::from_secs(2));
        cache.put(k.clone(), result, Duration::from_secs(300)).await;

        let hit = cache.get(&k).await.unwrap();
        assert_eq!(hit.hook_name, "bandit");
        let stats = cache.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.capacity, None);
    }

    #[tokio::test]
    async fn expired_entry_is_deleted_on_read() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let k = key("bandit");
        cache
            .put(k.clone(), HookResult::passed("bandit", HookStage::Comprehensive, Duration::ZERO), Duration::from_secs(0))
            .await;

        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.stats().await.total, 0);
    }

    #[tokio::test]
    async fn stats_partitions_active_and_expired_without_evicting() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .put(key("fresh"), HookResult::passed("fresh", HookStage::Fast, Duration::ZERO), Duration::from_secs(60))
            .await;
        cache
            .put(key("stale"), HookResult::passed("stale", HookStage::Fast, Duration::ZERO), Duration::from_secs(0))
            .await;

        let stats = cache.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.capacity, None);
        assert_eq!(stats.default_ttl, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .put(key("a"), HookResult::passed("a", HookStage::Fast, Duration::ZERO), Duration::from_secs(60))
            .await;
        cache
            .put(key("b"), HookResult::passed("b", HookStage::Fast, Duration::ZERO), Duration::from_secs(60))
            .await;
        cache.clear().await;
        assert_eq!(cache.stats().await.total, 0);
    }
}
