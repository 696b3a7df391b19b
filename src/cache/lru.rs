//! In-process LRU cache backend, bounded by entry count.
//!
//! Grounded in the reference's `OrderedDict` + `move_to_end` scheme: a
//! `VecDeque` tracks recency (front = least recently used), and a hit
//! moves its key to the back. Expiry is checked lazily on `get`, never by
//! a background sweep.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Cache, CacheKey, CacheStats};
use crate::hook::HookResult;

struct Entry {
    result: HookResult,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl State {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

/// Default TTL reported in `stats()` for caches constructed without an
/// explicit one via [`LruCache::with_default_ttl`].
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Ephemeral, process-local cache. Default capacity mirrors a single
/// strategy run's hook count in practice; callers with unusually large
/// strategies should size it explicitly.
pub struct LruCache {
    state: Mutex<State>,
    capacity: usize,
    default_ttl: Duration,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity: capacity.max(1),
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }
}

#[async_trait]
impl Cache for LruCache {
    async fn get(&self, key: &CacheKey) -> Option<HookResult> {
        let mut state = self.state.lock();
        let key_str = key.as_str();

        let expired = state.entries.get(key_str).is_some_and(Entry::is_expired);
        if expired {
            state.entries.remove(key_str);
            if let Some(pos) = state.order.iter().position(|k| k == key_str) {
                state.order.remove(pos);
            }
            return None;
        }

        if let Some(entry) = state.entries.get(key_str) {
            let result = entry.result.clone();
            state.touch(key_str);
            Some(result)
        } else {
            None
        }
    }

    async fn put(&self, key: CacheKey, result: HookResult, ttl: Duration) {
        let mut state = self.state.lock();
        let key_str = key.as_str().to_string();

        if !state.entries.contains_key(&key_str) && state.entries.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }

        state.entries.insert(
            key_str.clone(),
            Entry {
                result,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        state.touch(&key_str);
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.entries.len();
        let expired = state.entries.values().filter(|e| e.is_expired()).count();
        CacheStats {
            total,
            active: total - expired,
            expired,
            capacity: Some(self.capacity),
            default_ttl: self.default_ttl,
        }
    }

    async fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookStage;
    use std::time::Duration as StdDuration;

    fn key(name: &str) -> CacheKey {
        CacheKey::compute(name, &serde_json::json!({}), &[])
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = LruCache::new(4);
        let k = key("ruff-check");
        assert!(cache.get(&k).await.is_none());

        let result = HookResult::passed("ruff-check", HookStage::Fast, StdDuration::from_secs(1));
        cache.put(k.clone(), result, StdDuration::from_secs(60)).await;
        assert!(cache.get(&k).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.capacity, Some(4));
    }

    #[tokio::test]
    async fn evicts_least_recently_used_when_over_capacity() {
        let cache = LruCache::new(2);
        let a = key("a");
        let b = key("b");
        let c = key("c");

        for k in [&a, &b] {
            cache
                .put(k.clone(), HookResult::passed("h", HookStage::Fast, StdDuration::ZERO), StdDuration::from_secs(60))
                .await;
        }
        // touch `a` so `b` becomes least recently used
        cache.get(&a).await;
        cache
            .put(c.clone(), HookResult::passed("h", HookStage::Fast, StdDuration::ZERO), StdDuration::from_secs(60))
            .await;

        assert!(cache.get(&b).await.is_none());
        assert!(cache.get(&a).await.is_some());
        assert!(cache.get(&c).await.is_some());
    }

    #[tokio::test]
    async fn expired_entry_counts_as_miss() {
        let cache = LruCache::new(4);
        let k = key("ruff-check");
        cache
            .put(k.clone(), HookResult::passed("ruff-check", HookStage::Fast, StdDuration::ZERO), StdDuration::from_millis(0))
            .await;
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        assert!(cache.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn stats_partitions_active_and_expired_without_evicting() {
        let cache = LruCache::new(4);
        cache
            .put(key("fresh"), HookResult::passed("fresh", HookStage::Fast, StdDuration::ZERO), StdDuration::from_secs(60))
            .await;
        cache
            .put(key("stale"), HookResult::passed("stale", HookStage::Fast, StdDuration::ZERO), StdDuration::from_millis(0))
            .await;
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        let stats = cache.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.capacity, Some(4));
        assert_eq!(stats.default_ttl, Duration::from_secs(3600));
    }
}
