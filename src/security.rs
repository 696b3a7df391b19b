//! Security-level classification and publish-gating audit (§4.5, DESIGN NOTES).
//!
//! A hook's [`crate::hook::SecurityLevel`] is mostly set explicitly on its
//! [`crate::hook::HookDefinition`]; this module only supplies the fallback
//! used when a hook's security level wasn't set by its author, plus the
//! report the orchestrator consults before allowing a publish step.

use std::collections::HashSet;

use crate::hook::{HookResult, HookStatus, SecurityLevel};

/// Hooks whose failure always blocks publishing outright, regardless of
/// any explicit `security_level` on the definition.
pub const CRITICAL_HOOKS: &[&str] = &["bandit", "pyright", "gitleaks"];

/// Hooks treated as high-security by name when their definition didn't
/// set a level explicitly.
pub const HIGH_SECURITY_HOOKS: &[&str] = &[
    "validate-regex-patterns",
    "creosote",
    "check-added-large-files",
    "uv-lock",
];

/// Resolve the effective security level for a hook, given the level its
/// definition declared. Name-based overrides take precedence over a
/// `Medium`/`Low` default but never downgrade an author's explicit
/// `Critical`/`High` choice.
pub fn effective_security_level(hook_name: &str, declared: SecurityLevel) -> SecurityLevel {
    if CRITICAL_HOOKS.contains(&hook_name) {
        return SecurityLevel::Critical;
    }
    if declared >= SecurityLevel::High {
        return declared;
    }
    if HIGH_SECURITY_HOOKS.contains(&hook_name) {
        return SecurityLevel::High;
    }
    declared
}

/// Outcome of auditing a completed strategy run for publish-readiness.
#[derive(Debug, Clone)]
pub struct SecurityAuditReport {
    pub allows_publishing: bool,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Evaluates a strategy's results against the security-level policy.
pub struct SecurityAuditor {
    critical_hooks: HashSet<String>,
    high_security_hooks: HashSet<String>,
}

impl Default for SecurityAuditor {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityAuditor {
    pub fn new() -> Self {
        Self {
            critical_hooks: CRITICAL_HOOKS.iter().map(|s| (*s).to_string()).collect(),
            high_security_hooks: HIGH_SECURITY_HOOKS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn security_level_of(&self, hook_name: &str, declared: SecurityLevel) -> SecurityLevel {
        if self.critical_hooks.contains(hook_name) {
            return SecurityLevel::Critical;
        }
        if declared >= SecurityLevel::High {
            return declared;
        }
        if self.high_security_hooks.contains(hook_name) {
            return SecurityLevel::High;
        }
        declared
    }

    /// Any non-passing result at `Critical` security blocks publishing.
    /// `High`-security failures are surfaced as warnings, not a hard
    /// block; everything else is informational at most.
    pub fn audit(&self, results: &[(HookResult, SecurityLevel)]) -> SecurityAuditReport {
        let mut allows_publishing = true;
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        for (result, declared_level) in results {
            if result.status == HookStatus::Passed {
                continue;
            }
            let level = self.security_level_of(&result.hook_name, *declared_level);
            match level {
                SecurityLevel::Critical => {
                    allows_publishing = false;
                    warnings.push(format!(
                        "critical security hook `{}` did not pass ({:?})",
                        result.hook_name, result.status
                    ));
                }
                SecurityLevel::High => {
                    warnings.push(format!(
                        "high-security hook `{}` did not pass ({:?})",
                        result.hook_name, result.status
                    ));
                    recommendations.push(format!("re-run `{}` before publishing", result.hook_name));
                }
                SecurityLevel::Medium | SecurityLevel::Low => {}
            }
        }

        SecurityAuditReport {
            allows_publishing,
            warnings,
            recommendations,
        }
    }
}
