//! Resource Manager (§4.1): the process-scoped registry that guarantees
//! cleanup of owned resources on every exit path.
//!
//! Resources register in acquisition order and release in the reverse
//! order (`insertion order = reverse cleanup order`, §3). Cleanup never
//! aborts partway through: every handle's release is attempted and its
//! error, if any, is logged rather than propagated.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::warn;

const SUBPROCESS_GRACE: Duration = Duration::from_secs(5);
const SUBPROCESS_KILL_GRACE: Duration = Duration::from_secs(2);
const TASK_CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

/// A single owned, releasable resource.
///
/// Each variant's `release` is idempotent, tolerates the underlying
/// resource already being gone, and never blocks indefinitely.
pub enum ResourceHandle {
    TempFile(PathBuf),
    TempDir(PathBuf),
    Subprocess(Child),
    Task(JoinHandle<()>),
    FileHandle(Option<std::fs::File>),
    /// A file with an advisory lock held via `fs2`; unlocking happens before
    /// the handle is dropped (which closes the underlying file).
    LockedFile(Option<std::fs::File>),
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceHandle::TempFile(p) => write!(f, "TempFile({})", p.display()),
            ResourceHandle::TempDir(p) => write!(f, "TempDir({})", p.display()),
            ResourceHandle::Subprocess(c) => write!(f, "Subprocess(pid={:?})", c.id()),
            ResourceHandle::Task(_) => write!(f, "Task"),
            ResourceHandle::FileHandle(_) => write!(f, "FileHandle"),
            ResourceHandle::LockedFile(_) => write!(f, "LockedFile"),
        }
    }
}

impl ResourceHandle {
    /// Release the resource. Always returns `Ok` from the registry's point
    /// of view — failures are logged internally, never propagated, so that
    /// a single bad handle cannot stop the rest of cleanup.
    async fn release(self) {
        match self {
            ResourceHandle::TempFile(path) => {
                if let Err(e) = fs_err::tokio::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove temp file");
                    }
                }
            }
            ResourceHandle::TempDir(path) => {
                if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove temp dir");
                    }
                }
            }
            ResourceHandle::Subprocess(mut child) => {
                release_subprocess(&mut child).await;
            }
            ResourceHandle::Task(handle) => {
                release_task(handle).await;
            }
            ResourceHandle::FileHandle(file) => {
                drop(file); // closing is just dropping; already-closed is a no-op
            }
            ResourceHandle::LockedFile(file) => {
                if let Some(f) = &file {
                    if let Err(e) = fs2::FileExt::unlock(f) {
                        warn!(error = %e, "failed to release advisory lock");
                    }
                }
                drop(file);
            }
        }
    }
}

async fn release_subprocess(child: &mut Child) {
    // Already exited: nothing to do, report as success.
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    terminate_gracefully(child);

    if tokio::time::timeout(SUBPROCESS_GRACE, child.wait())
        .await
        .is_ok()
    {
        return;
    }

    if let Err(e) = child.start_kill() {
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!(error = %e, "failed to force-kill subprocess");
        }
    }

    if tokio::time::timeout(SUBPROCESS_KILL_GRACE, child.wait())
        .await
        .is_err()
    {
        warn!(pid = ?child.id(), "subprocess did not terminate after force kill");
    }
}

#[cfg(unix)]
fn terminate_gracefully(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is a plain integer obtained from the child handle;
        // sending a signal to a process we own is always safe to attempt,
        // and ESRCH (already exited) is a benign outcome we ignore.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) {
    // No portable graceful-termination signal on this platform; the
    // subsequent forceful kill takes over.
}

async fn release_task(handle: JoinHandle<()>) {
    if handle.is_finished() {
        let _ = handle.await;
        return;
    }
    handle.abort();
    match tokio::time::timeout(TASK_CANCEL_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(join_err)) if join_err.is_cancelled() => {}
        Ok(Err(join_err)) => warn!(error = %join_err, "task cleanup raised"),
        Err(_) => warn!("task did not acknowledge cancellation within budget"),
    }
}

/// Tracks resources outstanding after `cleanup_all()`, for debug builds.
///
/// Constructed explicitly and attached to a [`ResourceManager`] — never via
/// import-time/static side effects.
#[derive(Debug, Default)]
pub struct LeakDetector {
    open_files: Mutex<Vec<String>>,
    active_pids: Mutex<Vec<u32>>,
    active_tasks: Mutex<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    pub open_files: Vec<String>,
    pub active_pids: Vec<u32>,
    pub active_tasks: usize,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.open_files.is_empty() && self.active_pids.is_empty() && self.active_tasks == 0
    }
}

impl LeakDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_file(&self, path: impl Into<String>) {
        self.open_files.lock().push(path.into());
    }

    pub fn untrack_file(&self, path: &str) {
        self.open_files.lock().retain(|p| p != path);
    }

    pub fn track_pid(&self, pid: u32) {
        self.active_pids.lock().push(pid);
    }

    pub fn untrack_pid(&self, pid: u32) {
        self.active_pids.lock().retain(|p| *p != pid);
    }

    pub fn track_task(&self) {
        *self.active_tasks.lock() += 1;
    }

    pub fn untrack_task(&self) {
        let mut tasks = self.active_tasks.lock();
        *tasks = tasks.saturating_sub(1);
    }

    pub fn report(&self) -> LeakReport {
        LeakReport {
            open_files: self.open_files.lock().clone(),
            active_pids: self.active_pids.lock().clone(),
            active_tasks: *self.active_tasks.lock(),
        }
    }
}

/// The process-scoped registry of owned cleanup handles.
///
/// Idiomatic use: acquire one per orchestrator invocation, hand it to
/// collaborators that need to register resources, and call
/// [`ResourceManager::cleanup_all`] on every exit path (including
/// cancellation) — typically from a `finally`-equivalent guard.
pub struct ResourceManager {
    state: Mutex<RegistryState>,
    leak_detector: Option<LeakDetector>,
}

#[derive(Default)]
struct RegistryState {
    resources: Vec<ResourceHandle>,
    closed: bool,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            leak_detector: None,
        }
    }

    pub fn with_leak_detection() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            leak_detector: Some(LeakDetector::new()),
        }
    }

    pub fn leak_detector(&self) -> Option<&LeakDetector> {
        self.leak_detector.as_ref()
    }

    /// Register a resource for cleanup. If the registry has already been
    /// drained, the handle is released immediately instead of being queued.
    pub async fn register(&self, handle: ResourceHandle) {
        let rejected = {
            let mut state = self.state.lock();
            if state.closed {
                Some(handle)
            } else {
                state.resources.push(handle);
                None
            }
        };

        if let Some(handle) = rejected {
            handle.release().await;
        }
    }

    /// Release every registered resource in reverse insertion order.
    /// Idempotent: a second call is a no-op.
    pub async fn cleanup_all(&self) {
        let resources = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.resources)
        };

        for resource in resources.into_iter().rev() {
            resource.release().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
