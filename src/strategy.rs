//! An ordered bundle of hooks plus execution policy (§3 HookStrategy).

use std::time::Duration;

use crate::hook::{HookDefinition, HookResult, RetryPolicy};

/// Immutable bundle of hook definitions and the policy used to run them.
#[derive(Debug, Clone)]
pub struct HookStrategy {
    pub name: String,
    pub hooks: Vec<HookDefinition>,
    /// If false, wave width is forced to 1 regardless of `max_workers`.
    pub parallel: bool,
    /// Concurrency cap within any single wave, 1-16.
    pub max_workers: usize,
    pub overall_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Whether hooks with `manual_stage = true` should be dispatched at
    /// all. When false (the default), they are assigned a `Skipped`
    /// result by the orchestrator without ever reaching the scheduler.
    pub include_manual_stage: bool,
    /// TTL applied to every cache write made while running this strategy
    /// (§4.6 step 4: "write to the cache with the strategy-level TTL").
    pub cache_ttl: Duration,
}

impl HookStrategy {
    pub fn new(name: impl Into<String>, hooks: Vec<HookDefinition>) -> Self {
        Self {
            name: name.into(),
            hooks,
            parallel: true,
            max_workers: 4,
            overall_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::None,
            include_manual_stage: false,
            cache_ttl: Duration::from_secs(3600),
        }
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_manual_stage(mut self) -> Self {
        self.include_manual_stage = true;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, 16);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Effective per-wave concurrency cap honoring `parallel`.
    pub fn effective_max_workers(&self) -> usize {
        if self.parallel {
            self.max_workers
        } else {
            1
        }
    }
}

/// Aggregate outcome of running a strategy to completion (or to an early
/// critical-failure exit).
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy_name: String,
    pub results: Vec<HookResult>,
    pub total_duration: Duration,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

impl StrategyResult {
    /// True iff every result passed. Matches §4.6 step 7.
    pub fn success(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.status == crate::hook::HookStatus::Passed)
    }
}
