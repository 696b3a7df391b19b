//! Content-addressed hook result cache (§4.3).
//!
//! A [`CacheKey`] is derived from the hook's name, its resolved
//! configuration, and the contents of the files it would see — never from
//! file paths or mtimes, so a cache hit means "this exact input already
//! produced this exact result" regardless of when or where it ran.
//!
//! Two backends share the [`Cache`] trait: [`lru::LruCache`], in-process
//! and bounded by entry count, and [`persistent::SqliteCache`], durable
//! across runs. Both apply TTL eviction lazily, on read.

pub mod lru;
pub mod persistent;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::hook::HookResult;

/// Opaque content-addressed lookup key. Two invocations with the same
/// hook name, configuration, and file contents produce the same key
/// regardless of file path or invocation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `sha256(config)[:16]` and `sha256(sorted file contents)[:16]`,
    /// joined with the hook name. `config` is any `Serialize` value whose
    /// JSON rendering is canonical (serde_json's default map ordering is
    /// already key-sorted, since the `preserve_order` feature is not
    /// enabled on this crate's `serde_json` dependency).
    pub fn compute<C: Serialize>(
        hook_name: &str,
        config: &C,
        file_contents: &[(&Path, &str)],
    ) -> Self {
        let config_json = serde_json::to_vec(config).unwrap_or_default();
        let config_hash = hex16(&config_json);

        let mut sorted: Vec<&(&Path, &str)> = file_contents.iter().collect();
        sorted.sort_by_key(|(path, _)| *path);
        let mut content_hasher = Sha256::new();
        for (_, content) in &sorted {
            content_hasher.update(content.as_bytes());
            content_hasher.update(b"\0");
        }
        let content_hash = hex16_digest(content_hasher);

        Self(format!("{hook_name}:{config_hash}:{content_hash}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex16(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex16_digest(hasher)
}

fn hex16_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Snapshot of a cache backend's occupancy (§4.3). `capacity` is `None` for
/// backends with no entry-count bound (the persistent backend); `expired`
/// counts entries still physically present but past their TTL, not yet
/// lazily evicted by a `get`.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub capacity: Option<usize>,
    pub default_ttl: Duration,
}

/// Shared contract for both cache backends.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<HookResult>;
    async fn put(&self, key: CacheKey, result: HookResult, ttl: Duration);
    async fn stats(&self) -> CacheStats;
    /// Drop every entry. Used between test cases and by explicit cache-bust
    /// requests; not part of the hot path.
    async fn clear(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let a = CacheKey::compute("ruff-check", &serde_json::json!({"line-length": 88}), &[]);
        let b = CacheKey::compute("ruff-check", &serde_json::json!({"line-length": 88}), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_config_produces_different_key() {
        let a = CacheKey::compute("ruff-check", &serde_json::json!({"line-length": 88}), &[]);
        let b = CacheKey::compute("ruff-check", &serde_json::json!({"line-length": 100}), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn file_order_does_not_affect_key() {
        let p1 = PathBuf::from("a.py");
        let p2 = PathBuf::from("b.py");
        let cfg = serde_json::json!({});
        let a = CacheKey::compute("ruff-check", &cfg, &[(p1.as_path(), "x"), (p2.as_path(), "y")]);
        let b = CacheKey::compute("ruff-check", &cfg, &[(p2.as_path(), "y"), (p1.as_path(), "x")]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_file_content_produces_different_key() {
        let p = PathBuf::from("a.py");
        let cfg = serde_json::json!({});
        let a = CacheKey::compute("ruff-check", &cfg, &[(p.as_path(), "x")]);
        let b = CacheKey::compute("ruff-check", &cfg, &[(p.as_path(), "y")]);
        assert_ne!(a, b);
    }

    /// §8: a hook's cache key must change when its stage or security level
    /// changes, not just its argv or timeout, so that a hook promoted to
    /// `Critical` or moved between stages is never served a stale result
    /// cached under the old classification.
    #[test]
    fn stage_or_security_level_change_produces_different_key() {
        use crate::hook::{HookStage, SecurityLevel};

        let base = serde_json::json!({
            "argv": ["ruff", "check"],
            "timeout_secs": 60,
            "stage": HookStage::Fast,
            "security_level": SecurityLevel::Medium,
        });
        let different_stage = serde_json::json!({
            "argv": ["ruff", "check"],
            "timeout_secs": 60,
            "stage": HookStage::Comprehensive,
            "security_level": SecurityLevel::Medium,
        });
        let different_security_level = serde_json::json!({
            "argv": ["ruff", "check"],
            "timeout_secs": 60,
            "stage": HookStage::Fast,
            "security_level": SecurityLevel::Critical,
        });

        let base_key = CacheKey::compute("ruff-check", &base, &[]);
        let stage_key = CacheKey::compute("ruff-check", &different_stage, &[]);
        let security_key = CacheKey::compute("ruff-check", &different_security_level, &[]);

        assert_ne!(base_key, stage_key);
        assert_ne!(base_key, security_key);
        assert_ne!(stage_key, security_key);
    }
}
