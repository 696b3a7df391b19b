//! Top-level entry point (§4.6): runs one or more strategies against the
//! adaptive executor, grades the aggregate result against the security
//! policy, and guarantees resource cleanup on every exit path — success,
//! early `OrchestratorError`, or a panic unwinding through `cleanup_all`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrchestratorError;
use crate::events::{emit_safely, EventBus, EventPayload, EventType};
use crate::executor::{AdaptiveExecutor, FileFilter, ProgressObserver};
use crate::hook::HookResult;
use crate::resource::ResourceManager;
use crate::security::{SecurityAuditReport, SecurityAuditor};
use crate::strategy::{HookStrategy, StrategyResult};

/// Forwards the executor's hook-level progress callbacks onto the
/// orchestrator's event bus as `HookExecutionStarted`/`Completed`, in
/// addition to invoking any caller-supplied [`ProgressObserver`]. Ordering
/// within a single hook is preserved: `started` strictly precedes
/// `completed` (§5) because both calls come straight through from the
/// executor's own start/complete notification points.
struct EventBusObserver<'a> {
    bus: Option<&'a dyn EventBus>,
    inner: Option<&'a dyn ProgressObserver>,
}

impl ProgressObserver for EventBusObserver<'_> {
    fn on_hook_start(&self, hook_name: &str) {
        emit_safely(
            self.bus,
            EventType::HookExecutionStarted,
            EventPayload::HookStarted { hook_name: hook_name.to_string() },
        );
        if let Some(inner) = self.inner {
            inner.on_hook_start(hook_name);
        }
    }

    fn on_hook_complete(&self, result: &HookResult) {
        emit_safely(
            self.bus,
            EventType::HookExecutionCompleted,
            EventPayload::HookCompleted {
                hook_name: result.hook_name.clone(),
                status: result.status,
            },
        );
        if let Some(inner) = self.inner {
            inner.on_hook_complete(result);
        }
    }
}

/// A strategy's execution result paired with its security audit.
#[derive(Debug, Clone)]
pub struct OrchestrationReport {
    pub strategy_result: StrategyResult,
    pub audit: SecurityAuditReport,
}

/// Owns the resource registry for a run and drives strategies through the
/// executor, one at a time.
pub struct Orchestrator {
    executor: AdaptiveExecutor,
    resource_manager: Arc<ResourceManager>,
    security_auditor: SecurityAuditor,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl Orchestrator {
    pub fn new(executor: AdaptiveExecutor, resource_manager: Arc<ResourceManager>) -> Self {
        Self {
            executor,
            resource_manager,
            security_auditor: SecurityAuditor::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.resource_manager
    }

    /// Run a single strategy to completion. The resource registry is
    /// drained unconditionally before this returns, whether the executor
    /// succeeded or raised an `OrchestratorError`.
    pub async fn run_strategy(
        &self,
        strategy: &HookStrategy,
        file_filter: &dyn FileFilter,
        repo_root: &std::path::Path,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<OrchestrationReport, OrchestratorError> {
        let bus = self.event_bus.as_deref();
        emit_safely(
            bus,
            EventType::HookStrategyStarted,
            EventPayload::StrategyStarted { strategy_name: strategy.name.clone() },
        );

        // Hooks tagged `manual_stage` are assigned a `Skipped` result here,
        // by the orchestrator, without ever reaching the scheduler (§3, §4.5).
        let (dispatched, skipped): (Vec<_>, Vec<_>) = strategy
            .hooks
            .iter()
            .cloned()
            .partition(|h| strategy.include_manual_stage || !h.manual_stage);
        let dispatch_strategy = HookStrategy { hooks: dispatched, ..strategy.clone() };

        let observer = EventBusObserver { bus, inner: progress };
        let outcome = self.executor.run(&dispatch_strategy, file_filter, repo_root, Some(&observer)).await;
        self.resource_manager.cleanup_all().await;

        let outcome = outcome.map(|mut result| {
            result.results.extend(skipped.iter().map(|h| HookResult::skipped(h.name.clone(), h.stage)));
            let order: HashMap<&str, usize> =
                strategy.hooks.iter().enumerate().map(|(i, h)| (h.name.as_str(), i)).collect();
            result.results.sort_by_key(|r| order.get(r.hook_name.as_str()).copied().unwrap_or(usize::MAX));
            result
        });

        if let Ok(result) = &outcome {
            emit_safely(
                bus,
                EventType::HookStrategyCompleted,
                EventPayload::StrategyCompleted {
                    strategy_name: strategy.name.clone(),
                    success: result.success(),
                },
            );
        }

        let strategy_result = outcome?;

        let level_by_name: HashMap<&str, crate::hook::SecurityLevel> = strategy
            .hooks
            .iter()
            .map(|h| (h.name.as_str(), h.security_level))
            .collect();

        let graded: Vec<(crate::hook::HookResult, crate::hook::SecurityLevel)> = strategy_result
            .results
            .iter()
            .cloned()
            .map(|r| {
                let level = level_by_name
                    .get(r.hook_name.as_str())
                    .copied()
                    .unwrap_or(crate::hook::SecurityLevel::Medium);
                (r, level)
            })
            .collect();

        let audit = self.security_auditor.audit(&graded);

        Ok(OrchestrationReport { strategy_result, audit })
    }

    /// Run several strategies in sequence (e.g. fast, then comprehensive),
    /// stopping at the first one that raises an `OrchestratorError`.
    pub async fn run_strategies(
        &self,
        strategies: &[HookStrategy],
        file_filter: &dyn FileFilter,
        repo_root: &std::path::Path,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<Vec<OrchestrationReport>, OrchestratorError> {
        let mut reports = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            reports.push(self.run_strategy(strategy, file_filter, repo_root, progress).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lru::LruCache;
    use crate::executor::{DefaultCommandBuilder, SubprocessExecutor};
    use crate::graph::DependencyGraph;
    use crate::hook::{HookDefinition, SecurityLevel};
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        let executor = Arc::new(SubprocessExecutor::new(DefaultCommandBuilder));
        let cache = Arc::new(LruCache::new(16));
        let adaptive = AdaptiveExecutor::new(executor, cache, DependencyGraph::new());
        Orchestrator::new(adaptive, Arc::new(ResourceManager::new()))
    }

    #[tokio::test]
    async fn cycle_is_surfaced_and_resources_still_cleaned_up() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        let executor = Arc::new(SubprocessExecutor::new(DefaultCommandBuilder));
        let cache = Arc::new(LruCache::new(16));
        let adaptive = AdaptiveExecutor::new(executor, cache, graph);
        let resource_manager = Arc::new(ResourceManager::new());
        let orchestrator = Orchestrator::new(adaptive, resource_manager.clone());

        let hooks = vec![
            HookDefinition::new("a", vec!["true".to_string()]).with_timeout(Duration::from_secs(1)),
            HookDefinition::new("b", vec!["true".to_string()]).with_timeout(Duration::from_secs(1)),
        ];
        let strategy = HookStrategy::new("fast", hooks);

        let err = orchestrator.run_strategy(&strategy, &crate::executor::NoFilesFilter, std::path::Path::new("."), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cycle(_)));
        assert!(resource_manager.is_closed());
    }

    #[tokio::test]
    async fn manual_stage_hook_is_skipped_unless_opted_in() {
        let orchestrator = orchestrator();
        let hooks = vec![
            HookDefinition::new("always-on", vec!["true".to_string()]).with_timeout(Duration::from_secs(5)),
            HookDefinition::new("manual-only", vec!["true".to_string()])
                .with_timeout(Duration::from_secs(5))
                .manual_stage(),
        ];
        let strategy = HookStrategy::new("fast", hooks);
        let report = orchestrator.run_strategy(&strategy, &crate::executor::NoFilesFilter, std::path::Path::new("."), None).await.unwrap();

        assert_eq!(report.strategy_result.results.len(), 2);
        // original definition order is preserved even though the manual
        // hook never reached the scheduler.
        assert_eq!(report.strategy_result.results[0].hook_name, "always-on");
        assert_eq!(report.strategy_result.results[1].hook_name, "manual-only");
        assert_eq!(report.strategy_result.results[1].status, crate::hook::HookStatus::Skipped);
    }

    #[tokio::test]
    async fn manual_stage_hook_runs_when_strategy_opts_in() {
        let orchestrator = orchestrator();
        let hooks = vec![HookDefinition::new("manual-only", vec!["true".to_string()])
            .with_timeout(Duration::from_secs(5))
            .manual_stage()];
        let strategy = HookStrategy::new("fast", hooks).with_manual_stage();
        let report = orchestrator.run_strategy(&strategy, &crate::executor::NoFilesFilter, std::path::Path::new("."), None).await.unwrap();

        assert_eq!(report.strategy_result.results[0].status, crate::hook::HookStatus::Passed);
    }

    #[tokio::test]
    async fn audit_reflects_hook_security_levels() {
        let orchestrator = orchestrator();
        let hooks = vec![
            HookDefinition::new("true-check", vec!["true".to_string()])
                .with_timeout(Duration::from_secs(5))
                .with_security_level(SecurityLevel::Critical),
        ];
        let strategy = HookStrategy::new("fast", hooks);
        let report = orchestrator.run_strategy(&strategy, &crate::executor::NoFilesFilter, std::path::Path::new("."), None).await.unwrap();
        assert!(report.audit.allows_publishing);
    }

    struct RecordingBus(parking_lot::Mutex<Vec<crate::events::EventType>>);

    impl crate::events::EventBus for RecordingBus {
        fn emit(&self, event_type: crate::events::EventType, _payload: crate::events::EventPayload) {
            self.0.lock().push(event_type);
        }
    }

    #[tokio::test]
    async fn event_bus_sees_strategy_and_hook_events_in_order() {
        use crate::events::EventType::*;

        let executor = Arc::new(SubprocessExecutor::new(DefaultCommandBuilder));
        let cache = Arc::new(LruCache::new(16));
        let adaptive = AdaptiveExecutor::new(executor, cache, DependencyGraph::new());
        let bus = Arc::new(RecordingBus(parking_lot::Mutex::new(Vec::new())));
        let orchestrator = Orchestrator::new(adaptive, Arc::new(ResourceManager::new()))
            .with_event_bus(bus.clone());

        let hooks = vec![HookDefinition::new("true-check", vec!["true".to_string()]).with_timeout(Duration::from_secs(5))];
        let strategy = HookStrategy::new("fast", hooks);
        orchestrator.run_strategy(&strategy, &crate::executor::NoFilesFilter, std::path::Path::new("."), None).await.unwrap();

        let events = bus.0.lock().clone();
        assert_eq!(
            events,
            vec![HookStrategyStarted, HookExecutionStarted, HookExecutionCompleted, HookStrategyCompleted]
        );
    }
}
