//! Error taxonomy for the orchestration core.
//!
//! Most failures degrade into a [`crate::hook::HookResult`] with a non-passed
//! status rather than propagating — see `§7` of the design notes. The types
//! here exist for the handful of cases that must surface before any hook
//! runs: a cyclic dependency graph, an unknown hook/strategy, or an
//! orchestrator-internal fault with no partial result to return.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that abort a run before (or instead of) producing a
/// `StrategyResult`.
///
/// Per-hook failures (tool nonzero exit, timeout, dispatch failure) are
/// never represented here — they become a `HookResult` with `status`
/// set accordingly and the run continues.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The dependency graph contains a cycle among the given hook names.
    /// No hook in the strategy was dispatched.
    #[error("circular dependency detected among hooks: {0:?}")]
    Cycle(Vec<String>),

    /// The strategy, a hook, or a setting referenced something the
    /// orchestrator doesn't recognize.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant was violated and no partial result could be
    /// computed (e.g. the executor's semaphore was poisoned).
    #[error("internal orchestrator fault: {0}")]
    Internal(String),
}

/// Failure classification for a single resource-lifecycle operation.
///
/// `ResourceError` never aborts a run on its own; the caller degrades the
/// affected hook's result to `ERROR` and cleanup proceeds regardless.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to create temporary file alongside {0}")]
    TempFileCreate(PathBuf, #[source] std::io::Error),

    #[error("atomic rename of {0} failed")]
    AtomicRename(PathBuf, #[source] std::io::Error),

    #[error("failed to acquire advisory lock on {path} within {timeout_secs}s")]
    LockTimeout { path: PathBuf, timeout_secs: f64 },

    #[error("failed to create directory {0}")]
    DirCreate(PathBuf, #[source] std::io::Error),

    #[error("batch file operation {index} failed, rolled back")]
    BatchFailed {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read {0} with any supported encoding")]
    UnsupportedEncoding(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a hook dispatch never produced a subprocess result.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command builder raised for hook `{0}`")]
    CommandBuilder(String, #[source] anyhow::Error),

    #[error("hook `{0}` resolved to an empty argv")]
    EmptyArgv(String),

    #[error("binary not found for hook `{0}`: {1}")]
    BinaryNotFound(String, String),

    #[error(transparent)]
    Spawn(#[from] std::io::Error),
}
