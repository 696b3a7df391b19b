//! The declarative hook model (§3 HookDefinition, HookResult).
//!
//! A [`HookDefinition`] is constructed once per run and is read-only from
//! then on; the executor never mutates it. [`HookResult`] is the only type
//! the executor produces, and it is what crosses back out to the caller and
//! into the cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse scheduling tag separating quick-running checks from slower,
/// typically manually-invoked ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStage {
    Fast,
    Comprehensive,
}

/// Governs whether a failure at this hook blocks publishing outright
/// (`Critical`) or is merely advisory (`Low`). Consumed by the
/// [`crate::security::SecurityAuditor`] and by the executor's
/// critical-short-circuit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Strategy-level policy for re-running hooks that failed on their first
/// attempt. See [`crate::strategy::HookStrategy::retry_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    FormattingOnly,
    AllHooks,
}

/// An immutable, declarative description of one external tool invocation.
///
/// Constructed once per run by the caller (typically from a config file
/// loaded by the CLI layer, which is out of scope here) and never mutated.
#[derive(Debug, Clone)]
pub struct HookDefinition {
    /// Stable kebab-case identifier, unique within a strategy.
    pub name: String,
    /// Tokens passed to the command builder / subprocess, before any
    /// per-file paths are appended.
    pub argv_template: Vec<String>,
    pub timeout: Duration,
    pub stage: HookStage,
    pub security_level: SecurityLevel,
    /// A nonzero exit paired with the "files were modified" sentinel in
    /// stdout means success-with-changes rather than failure.
    pub is_formatting: bool,
    /// Whether the executor may append per-file targets to argv rather than
    /// always doing a whole-tree invocation.
    pub accepts_file_paths: bool,
    pub retry_on_failure: bool,
    /// Skipped unless the strategy opts into the manual stage.
    pub manual_stage: bool,
}

impl HookDefinition {
    pub fn new(name: impl Into<String>, argv_template: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv_template,
            timeout: Duration::from_secs(60),
            stage: HookStage::Fast,
            security_level: SecurityLevel::Medium,
            is_formatting: false,
            accepts_file_paths: false,
            retry_on_failure: false,
            manual_stage: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stage(mut self, stage: HookStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn formatting(mut self) -> Self {
        self.is_formatting = true;
        self
    }

    pub fn accepts_file_paths(mut self) -> Self {
        self.accepts_file_paths = true;
        self
    }

    pub fn retry_on_failure(mut self) -> Self {
        self.retry_on_failure = true;
        self
    }

    pub fn manual_stage(mut self) -> Self {
        self.manual_stage = true;
        self
    }
}

/// Terminal state of a single hook invocation.
///
/// `Skipped` is assigned by the orchestrator, never by the scheduler
/// (§4.5): it means the hook was filtered out before dispatch, either by
/// a user skip-list or because the critical-failure short-circuit skipped
/// its wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Passed,
    Failed,
    Timeout,
    Error,
    Skipped,
}

impl HookStatus {
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            HookStatus::Failed | HookStatus::Timeout | HookStatus::Error
        )
    }
}

/// Outcome of running (or skipping, or serving from cache) a single hook.
///
/// Invariants (§3, §8):
/// - `status == Passed` implies `issues_count == 0`.
/// - `status == Timeout` implies `duration >= timeout_used`.
/// - `issues_count` is authoritative over `issues_found.len()`; the latter
///   may be truncated for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    pub hook_name: String,
    pub stage: HookStage,
    pub status: HookStatus,
    pub duration: Duration,
    /// Human-readable lines, possibly truncated with a "... and N more"
    /// marker. Never authoritative for counting — see `issues_count`.
    pub issues_found: Vec<String>,
    pub issues_count: usize,
    pub files_processed: usize,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub exit_code: Option<i32>,
    pub cache_hit: bool,
}

impl HookResult {
    pub fn passed(hook_name: impl Into<String>, stage: HookStage, duration: Duration) -> Self {
        Self {
            hook_name: hook_name.into(),
            stage,
            status: HookStatus::Passed,
            duration,
            issues_found: Vec::new(),
            issues_count: 0,
            files_processed: 0,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            exit_code: Some(0),
            cache_hit: false,
        }
    }

    pub fn skipped(hook_name: impl Into<String>, stage: HookStage) -> Self {
        Self {
            hook_name: hook_name.into(),
            stage,
            status: HookStatus::Skipped,
            duration: Duration::ZERO,
            issues_found: Vec::new(),
            issues_count: 0,
            files_processed: 0,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            exit_code: None,
            cache_hit: false,
        }
    }

    pub fn error(hook_name: impl Into<String>, stage: HookStage, message: impl Into<String>) -> Self {
        Self {
            hook_name: hook_name.into(),
            stage,
            status: HookStatus::Error,
            duration: Duration::ZERO,
            issues_found: vec![message.into()],
            issues_count: 1,
            files_processed: 0,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            exit_code: None,
            cache_hit: false,
        }
    }

    /// Checks the invariants from §3/§8. Used by tests and debug assertions,
    /// not enforced on the hot path.
    pub fn check_invariants(&self) -> bool {
        if self.status == HookStatus::Passed && self.issues_count != 0 {
            return false;
        }
        true
    }
}

/// Truncate an excerpt to at most `limit` bytes, appending a tail marker
/// when truncation happened. Operates on UTF-8 boundaries.
pub fn truncate_excerpt(input: &str, limit: usize) -> String {
    if input.len() <= limit {
        return input.to_string();
    }
    let mut end = limit;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated]", &input[..end])
}

/// Truncate an issue list for display, leaving `issues_count` as the
/// authoritative total (§3, §7).
pub fn truncate_issues(issues: Vec<String>, max_shown: usize) -> Vec<String> {
    let total = issues.len();
    if total <= max_shown {
        return issues;
    }
    let mut shown: Vec<String> = issues.into_iter().take(max_shown).collect();
    shown.push(format!("... and {} more", total - max_shown));
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passed_has_zero_issues() {
        let r = HookResult::passed("ruff-check", HookStage::Fast, Duration::from_secs(1));
        assert!(r.check_invariants());
    }

    #[test]
    fn truncate_excerpt_respects_char_boundaries() {
        let s = "héllo world";
        let truncated = truncate_excerpt(s, 2);
        assert!(truncated.is_char_boundary(truncated.len() - "\n... [truncated]".len()));
    }

    #[test]
    fn truncate_issues_keeps_authoritative_count() {
        let issues: Vec<String> = (0..10).map(|i| format!("issue {i}")).collect();
        let shown = truncate_issues(issues, 3);
        assert_eq!(shown.len(), 4);
        assert_eq!(shown[3], "... and 7 more");
    }
}
