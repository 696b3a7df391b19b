//! Hook orchestration core: a declarative hook model, a dependency-aware
//! wave scheduler, a bounded-concurrency adaptive executor, a
//! content-addressed result cache, and the resource-lifecycle primitives
//! that guarantee cleanup around all of it.
//!
//! The pieces compose roughly bottom-up:
//! [`hook`] and [`strategy`] describe *what* to run, [`graph`] orders it,
//! [`executor`] and [`cache`] run it efficiently, [`resource`] and [`fs`]
//! keep the filesystem and subprocess state it touches honest, and
//! [`orchestrator`] ties a run together end to end.

pub mod cache;
pub mod env;
pub mod error;
pub mod events;
pub mod executor;
pub mod fs;
pub mod graph;
pub mod hook;
pub mod orchestrator;
pub mod resource;
pub mod security;
pub mod strategy;

pub use cache::{Cache, CacheKey, CacheStats};
pub use error::{DispatchError, OrchestratorError, ResourceError};
pub use events::{EventBus, EventPayload, EventType};
pub use executor::{
    AdaptiveExecutor, CommandBuilder, ExtensionFilter, FileFilter, HookExecutor, NoFilesFilter,
    ProgressObserver, StaticFileSet,
};
pub use graph::DependencyGraph;
pub use hook::{HookDefinition, HookResult, HookStage, HookStatus, RetryPolicy, SecurityLevel};
pub use orchestrator::{OrchestrationReport, Orchestrator};
pub use resource::{LeakDetector, LeakReport, ResourceHandle, ResourceManager};
pub use security::{SecurityAuditReport, SecurityAuditor};
pub use strategy::{HookStrategy, StrategyResult};
