//! The adaptive parallel executor (§4.5).
//!
//! Runs a [`crate::strategy::HookStrategy`] wave-by-wave: each wave's hooks
//! dispatch concurrently under a shared semaphore, a cache lookup can skip
//! dispatch entirely, and a terminal failure at `Critical` security level
//! skips every remaining wave rather than running hooks whose results
//! would be moot. Grounded in the reference's `_execute_wave` and in the
//! teacher's `run_by_batch` semaphore-plus-join-set pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::cache::{Cache, CacheKey};
use crate::env::clean_environment;
use crate::error::DispatchError;
use crate::graph::DependencyGraph;
use crate::hook::{truncate_excerpt, truncate_issues, HookDefinition, HookResult, HookStage, HookStatus, RetryPolicy};
use crate::security::effective_security_level;
use crate::strategy::{HookStrategy, StrategyResult};

/// Bound on captured stdout/stderr per invocation (§3, §6).
const EXCERPT_LIMIT: usize = 64 * 1024;

/// Builds the argv for one hook invocation, given the files it targets.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, hook: &HookDefinition, files: &[PathBuf]) -> Result<Vec<String>, DispatchError>;
}

/// Appends file paths onto the hook's `argv_template` when the hook opts
/// into per-file invocation; otherwise runs the template unmodified.
pub struct DefaultCommandBuilder;

impl CommandBuilder for DefaultCommandBuilder {
    fn build(&self, hook: &HookDefinition, files: &[PathBuf]) -> Result<Vec<String>, DispatchError> {
        if hook.argv_template.is_empty() {
            return Err(DispatchError::EmptyArgv(hook.name.clone()));
        }
        let mut argv = hook.argv_template.clone();
        if hook.accepts_file_paths {
            argv.extend(files.iter().map(|p| p.to_string_lossy().into_owned()));
        }
        Ok(argv)
    }
}

/// External collaborator (§6): yields the files a specific hook should see.
/// Returns an empty list for whole-tree hooks. Must be stable (same answer
/// for the same hook name) within one orchestrator invocation.
pub trait FileFilter: Send + Sync {
    fn files_for(&self, hook_name: &str) -> Vec<PathBuf>;
}

/// Every hook sees the same fixed candidate list, regardless of name.
/// A reasonable stand-in for "the set of changed files in this commit."
pub struct StaticFileSet(pub Vec<PathBuf>);

impl FileFilter for StaticFileSet {
    fn files_for(&self, _hook_name: &str) -> Vec<PathBuf> {
        self.0.clone()
    }
}

/// Narrows a fixed candidate list down to files matching an extension
/// allow-list, for every hook queried.
pub struct ExtensionFilter {
    pub candidates: Vec<PathBuf>,
    pub extensions: Vec<String>,
}

impl FileFilter for ExtensionFilter {
    fn files_for(&self, _hook_name: &str) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .filter(|f| {
                f.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| self.extensions.iter().any(|want| want == ext))
            })
            .cloned()
            .collect()
    }
}

/// No hook ever receives per-file targets — every dispatch is whole-tree.
pub struct NoFilesFilter;

impl FileFilter for NoFilesFilter {
    fn files_for(&self, _hook_name: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Dispatches a single hook to completion. Never propagates a `Result` —
/// every failure mode (spawn failure, timeout, nonzero exit) degrades into
/// a [`HookResult`] with the matching status, per `§7`.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    async fn execute(&self, hook: &HookDefinition, files: &[PathBuf], repo_root: &Path) -> HookResult;
}

/// Runs a hook as an external subprocess with a scrubbed environment.
pub struct SubprocessExecutor<B: CommandBuilder> {
    command_builder: B,
}

impl<B: CommandBuilder> SubprocessExecutor<B> {
    pub fn new(command_builder: B) -> Self {
        Self { command_builder }
    }
}

#[async_trait]
impl<B: CommandBuilder> HookExecutor for SubprocessExecutor<B> {
    async fn execute(&self, hook: &HookDefinition, files: &[PathBuf], repo_root: &Path) -> HookResult {
        let argv = match self.command_builder.build(hook, files) {
            Ok(argv) => argv,
            Err(e) => return HookResult::error(&hook.name, hook.stage, e.to_string()),
        };

        let env = clean_environment();
        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(repo_root)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Guarantees the child is killed if the timeout branch below
            // drops it mid-wait, since `wait_with_output` consumes the
            // handle and leaves nothing else to kill explicitly.
            .kill_on_drop(true);

        let start = Instant::now();
        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                return HookResult::error(
                    &hook.name,
                    hook.stage,
                    DispatchError::Spawn(e).to_string(),
                )
            }
        };

        let output = match tokio::time::timeout(hook.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return HookResult::error(&hook.name, hook.stage, format!("subprocess I/O error: {e}")),
            Err(_) => {
                let mut result = HookResult::error(&hook.name, hook.stage, "hook timed out");
                result.status = HookStatus::Timeout;
                result.duration = hook.timeout;
                return result;
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // A formatter that rewrote files exits nonzero but isn't a failure.
        let formatting_changed = hook.is_formatting && stdout.contains("files were modified by this hook");

        let (status, issues_found, issues_count) = if output.status.success() || formatting_changed {
            (HookStatus::Passed, Vec::new(), 0)
        } else {
            let issues: Vec<String> = stdout.lines().filter(|l| !l.is_empty()).map(str::to_string).collect();
            let count = issues.len();
            (HookStatus::Failed, truncate_issues(issues, 20), count)
        };

        HookResult {
            hook_name: hook.name.clone(),
            stage: hook.stage,
            status,
            duration,
            issues_found,
            issues_count,
            files_processed: files.len(),
            stdout_excerpt: truncate_excerpt(&stdout, EXCERPT_LIMIT),
            stderr_excerpt: truncate_excerpt(&stderr, EXCERPT_LIMIT),
            exit_code: output.status.code(),
            cache_hit: false,
        }
    }
}

/// Receives lifecycle notifications as the executor progresses. A panic
/// inside either callback is caught and logged, never allowed to abort
/// the run it's merely observing.
pub trait ProgressObserver: Send + Sync {
    fn on_hook_start(&self, hook_name: &str);
    fn on_hook_complete(&self, result: &HookResult);
}

fn notify_start(observer: Option<&dyn ProgressObserver>, name: &str) {
    if let Some(obs) = observer {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs.on_hook_start(name))).is_err() {
            warn!(hook = name, "progress observer panicked on start callback");
        }
    }
}

fn notify_complete(observer: Option<&dyn ProgressObserver>, result: &HookResult) {
    if let Some(obs) = observer {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs.on_hook_complete(result))).is_err() {
            warn!(hook = %result.hook_name, "progress observer panicked on complete callback");
        }
    }
}

/// Wave-aware executor tying together the dependency graph, the cache,
/// and a pluggable [`HookExecutor`] under bounded concurrency.
pub struct AdaptiveExecutor {
    executor: Arc<dyn HookExecutor>,
    cache: Arc<dyn Cache>,
    graph: DependencyGraph,
    /// When true (the default), a `Critical`-security hook landing in
    /// `{Failed, Timeout, Error}` skips every remaining wave (§4.5). Set to
    /// false to run every wave regardless of critical failures — e.g. a
    /// dry-run mode that wants full coverage of every hook's result.
    stop_on_critical_failure: bool,
}

impl AdaptiveExecutor {
    pub fn new(executor: Arc<dyn HookExecutor>, cache: Arc<dyn Cache>, graph: DependencyGraph) -> Self {
        Self {
            executor,
            cache,
            graph,
            stop_on_critical_failure: true,
        }
    }

    pub fn with_stop_on_critical_failure(mut self, stop_on_critical_failure: bool) -> Self {
        self.stop_on_critical_failure = stop_on_critical_failure;
        self
    }

    pub async fn run(
        &self,
        strategy: &HookStrategy,
        file_filter: &dyn FileFilter,
        repo_root: &Path,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<StrategyResult, crate::error::OrchestratorError> {
        let waves = self.graph.compute_waves(&strategy.hooks)?;
        let levels: HashMap<String, crate::hook::SecurityLevel> = strategy
            .hooks
            .iter()
            .map(|h| (h.name.clone(), effective_security_level(&h.name, h.security_level)))
            .collect();

        let semaphore = Arc::new(Semaphore::new(strategy.effective_max_workers()));
        let start = Instant::now();
        let deadline = start + strategy.overall_timeout;
        let mut by_name: HashMap<String, HookResult> = HashMap::new();
        let mut cache_hits = 0usize;
        let mut cache_misses = 0usize;
        let mut short_circuited = false;
        let mut overall_timed_out = false;

        for wave in waves {
            if short_circuited || overall_timed_out {
                for hook in wave {
                    by_name.insert(hook.name.clone(), HookResult::skipped(hook.name.clone(), hook.stage));
                }
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                overall_timed_out = true;
                for hook in wave {
                    by_name.insert(hook.name.clone(), HookResult::skipped(hook.name.clone(), hook.stage));
                }
                continue;
            }

            let mut set = JoinSet::new();
            let mut names_by_task_id = HashMap::new();
            for hook in wave {
                notify_start(progress, &hook.name);
                let permit = semaphore.clone();
                let executor = self.executor.clone();
                let cache = self.cache.clone();
                // §4.6 step 2: the file set is queried per hook from the
                // injected file filter, not shared across the whole strategy.
                let hook_files = if hook.accepts_file_paths {
                    file_filter.files_for(&hook.name)
                } else {
                    Vec::new()
                };
                let retry_policy = strategy.retry_policy;
                let cache_ttl = strategy.cache_ttl;
                let repo_root = repo_root.to_path_buf();
                let hook_name = hook.name.clone();
                let hook_stage = hook.stage;
                let abort_handle = set.spawn(async move {
                    let _permit = permit
                        .acquire_owned()
                        .await
                        .expect("executor semaphore is never closed while hooks are in flight");
                    run_single_hook(executor, cache, hook, hook_files, repo_root, retry_policy, cache_ttl).await
                });
                names_by_task_id.insert(abort_handle.id(), (hook_name, hook_stage));
            }

            let mut wave_results = Vec::new();
            loop {
                let budget = deadline.saturating_duration_since(Instant::now());
                if budget.is_zero() {
                    break;
                }
                let joined = match tokio::time::timeout(budget, set.join_next_with_id()).await {
                    Ok(Some(joined)) => joined,
                    Ok(None) => break,
                    Err(_) => break, // overall timeout elapsed mid-wave
                };
                match joined {
                    Ok((task_id, (mut result, hit))) => {
                        if let Some((hook_name, _)) = names_by_task_id.remove(&task_id) {
                            result.hook_name = hook_name;
                        }
                        notify_complete(progress, &result);
                        if hit {
                            cache_hits += 1;
                        } else {
                            cache_misses += 1;
                        }
                        wave_results.push(result);
                    }
                    Err(join_err) => {
                        let (hook_name, hook_stage) = names_by_task_id
                            .remove(&join_err.id())
                            .unwrap_or_else(|| ("<unknown>".to_string(), HookStage::Fast));
                        let message = if join_err.is_panic() {
                            "hook task panicked".to_string()
                        } else {
                            "hook task was cancelled".to_string()
                        };
                        wave_results.push(HookResult::error(hook_name, hook_stage, message));
                    }
                }
            }

            // Whatever is still left in `names_by_task_id` never joined
            // before the strategy's overall deadline elapsed: abort those
            // tasks (which kills their subprocess via `kill_on_drop`) and
            // synthesize TIMEOUT results for them, per §5 Cancellation.
            if !names_by_task_id.is_empty() {
                overall_timed_out = true;
                set.abort_all();
                while let Some(joined) = set.join_next_with_id().await {
                    let task_id = match &joined {
                        Ok((id, _)) => *id,
                        Err(join_err) => join_err.id(),
                    };
                    if let Some((hook_name, hook_stage)) = names_by_task_id.remove(&task_id) {
                        let mut result = HookResult::error(hook_name, hook_stage, "strategy overall timeout exceeded");
                        result.status = HookStatus::Timeout;
                        result.duration = deadline.saturating_duration_since(start);
                        wave_results.push(result);
                    }
                }
            }

            short_circuited = self.stop_on_critical_failure
                && wave_results.iter().any(|r| {
                    r.status.is_terminal_failure()
                        && levels.get(&r.hook_name).copied().unwrap_or(crate::hook::SecurityLevel::Low)
                            == crate::hook::SecurityLevel::Critical
                });

            for result in wave_results {
                by_name.insert(result.hook_name.clone(), result);
            }
        }

        // §4.5/§5: completion order within (and across) waves is
        // non-deterministic, but the aggregated list must match the
        // strategy's original hook definition order.
        let results: Vec<HookResult> = strategy
            .hooks
            .iter()
            .filter_map(|h| by_name.remove(&h.name))
            .collect();

        Ok(StrategyResult {
            strategy_name: strategy.name.clone(),
            results,
            total_duration: start.elapsed(),
            cache_hits,
            cache_misses,
        })
    }
}

async fn run_single_hook(
    executor: Arc<dyn HookExecutor>,
    cache: Arc<dyn Cache>,
    hook: HookDefinition,
    targeted_files: Vec<PathBuf>,
    repo_root: PathBuf,
    retry_policy: RetryPolicy,
    cache_ttl: Duration,
) -> (HookResult, bool) {
    let file_contents: Vec<(PathBuf, String)> = targeted_files
        .iter()
        .filter_map(|p| crate::fs::safe_read_text(p).ok().map(|c| (p.clone(), c)))
        .collect();
    let contents_ref: Vec<(&Path, &str)> = file_contents.iter().map(|(p, c)| (p.as_path(), c.as_str())).collect();
    let config = serde_json::json!({
        "argv": hook.argv_template,
        "timeout_secs": hook.timeout.as_secs(),
        "stage": hook.stage,
        "security_level": hook.security_level,
    });
    let key = CacheKey::compute(&hook.name, &config, &contents_ref);

    if let Some(mut cached) = cache.get(&key).await {
        cached.cache_hit = true;
        return (cached, true);
    }

    let mut result = executor.execute(&hook, &targeted_files, &repo_root).await;

    let should_retry = result.status.is_terminal_failure()
        && match retry_policy {
            RetryPolicy::None => false,
            RetryPolicy::FormattingOnly => hook.is_formatting,
            RetryPolicy::AllHooks => true,
        };

    if should_retry {
        let first_duration = result.duration;
        let retried = executor.execute(&hook, &targeted_files, &repo_root).await;
        result = HookResult {
            duration: first_duration + retried.duration,
            ..retried
        };
    }

    if result.status == HookStatus::Passed {
        cache.put(key, result.clone(), cache_ttl).await;
    }

    (result, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lru::LruCache;
    use parking_lot::Mutex;

    struct ScriptedExecutor {
        responses: Mutex<HashMap<String, Vec<HookStatus>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(responses: HashMap<String, Vec<HookStatus>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HookExecutor for ScriptedExecutor {
        async fn execute(&self, hook: &HookDefinition, _files: &[PathBuf], _repo_root: &Path) -> HookResult {
            self.calls.lock().push(hook.name.clone());
            let status = self
                .responses
                .lock()
                .get_mut(&hook.name)
                .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
                .unwrap_or(HookStatus::Passed);

            let mut result = HookResult::passed(&hook.name, hook.stage, Duration::from_millis(1));
            result.status = status;
            if status.is_terminal_failure() {
                result.issues_count = 1;
                result.issues_found = vec!["boom".to_string()];
            }
            result
        }
    }

    fn hook(name: &str) -> HookDefinition {
        HookDefinition::new(name, vec![name.to_string()]).with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn independent_hooks_all_run_and_aggregate() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), vec![HookStatus::Passed]);
        responses.insert("b".to_string(), vec![HookStatus::Passed]);
        let executor = Arc::new(ScriptedExecutor::new(responses));
        let cache = Arc::new(LruCache::new(8));
        let adaptive = AdaptiveExecutor::new(executor, cache, DependencyGraph::new());

        let strategy = HookStrategy::new("fast", vec![hook("a"), hook("b")]);
        let result = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();

        assert_eq!(result.results.len(), 2);
        assert!(result.success());
    }

    #[tokio::test]
    async fn critical_security_failure_skips_remaining_waves() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("ruff-check", "bandit");

        let mut responses = HashMap::new();
        responses.insert("bandit".to_string(), vec![HookStatus::Failed]);
        responses.insert("ruff-check".to_string(), vec![HookStatus::Passed]);
        let executor = Arc::new(ScriptedExecutor::new(responses));
        let cache = Arc::new(LruCache::new(8));
        let adaptive = AdaptiveExecutor::new(executor, cache, graph);

        let bandit = hook("bandit").with_security_level(crate::hook::SecurityLevel::Critical);
        let ruff_check = hook("ruff-check");
        let strategy = HookStrategy::new("comprehensive", vec![bandit, ruff_check]);

        let result = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();

        let ruff_result = result.results.iter().find(|r| r.hook_name == "ruff-check").unwrap();
        assert_eq!(ruff_result.status, HookStatus::Skipped);
    }

    #[tokio::test]
    async fn stop_on_critical_failure_false_runs_every_wave_anyway() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("ruff-check", "bandit");

        let mut responses = HashMap::new();
        responses.insert("bandit".to_string(), vec![HookStatus::Failed]);
        responses.insert("ruff-check".to_string(), vec![HookStatus::Passed]);
        let executor = Arc::new(ScriptedExecutor::new(responses));
        let cache = Arc::new(LruCache::new(8));
        let adaptive = AdaptiveExecutor::new(executor, cache, graph).with_stop_on_critical_failure(false);

        let bandit = hook("bandit").with_security_level(crate::hook::SecurityLevel::Critical);
        let ruff_check = hook("ruff-check");
        let strategy = HookStrategy::new("comprehensive", vec![bandit, ruff_check]);

        let result = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();

        let ruff_result = result.results.iter().find(|r| r.hook_name == "ruff-check").unwrap();
        assert_eq!(ruff_result.status, HookStatus::Passed);
    }

    #[tokio::test]
    async fn retry_policy_all_hooks_retries_a_failed_hook() {
        let mut responses = HashMap::new();
        responses.insert("flaky".to_string(), vec![HookStatus::Failed, HookStatus::Passed]);
        let executor = Arc::new(ScriptedExecutor::new(responses));
        let cache = Arc::new(LruCache::new(8));
        let adaptive = AdaptiveExecutor::new(executor, cache, DependencyGraph::new());

        let strategy = HookStrategy::new("fast", vec![hook("flaky")]).with_retry_policy(RetryPolicy::AllHooks);
        let result = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();

        assert_eq!(result.results[0].status, HookStatus::Passed);
    }

    #[tokio::test]
    async fn cache_hit_skips_dispatch_on_second_run() {
        let mut responses = HashMap::new();
        responses.insert("ruff-format".to_string(), vec![HookStatus::Passed, HookStatus::Failed]);
        let executor = Arc::new(ScriptedExecutor::new(responses));
        let cache = Arc::new(LruCache::new(8));
        let adaptive = AdaptiveExecutor::new(executor, cache, DependencyGraph::new());

        let strategy = HookStrategy::new("fast", vec![hook("ruff-format")]);
        let first = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();
        let second = adaptive.run(&strategy, &NoFilesFilter, Path::new("."), None).await.unwrap();

        assert_eq!(first.cache_misses, 1);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.results[0].status, HookStatus::Passed);
        assert!(second.results[0].cache_hit);
    }
}
