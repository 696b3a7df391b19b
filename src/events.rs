//! Optional lifecycle event bus (§4.6 step 6, §6 External Interfaces).
//!
//! A caller may subscribe to strategy- and hook-level lifecycle
//! notifications without being on the hot path: `emit` is best-effort and a
//! panicking subscriber is caught and logged, never allowed to abort the
//! run it's merely observing — the same contract `ProgressObserver` gives
//! its two narrower callbacks.

use tracing::warn;

use crate::hook::HookStatus;

/// The four event types §6 names. `HookExecutionStarted`/`Completed` fire
/// once per hook dispatch; `HookStrategyStarted`/`Completed` bracket an
/// entire strategy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    HookStrategyStarted,
    HookStrategyCompleted,
    HookExecutionStarted,
    HookExecutionCompleted,
}

/// Payload carried alongside an [`EventType`]. Kept as a plain enum rather
/// than a type parameter so subscribers can match on event shape without
/// generics leaking into the orchestrator's public API.
#[derive(Debug, Clone)]
pub enum EventPayload {
    StrategyStarted { strategy_name: String },
    StrategyCompleted { strategy_name: String, success: bool },
    HookStarted { hook_name: String },
    HookCompleted { hook_name: String, status: HookStatus },
}

/// Subscriber contract. `emit` must not block indefinitely; the
/// orchestrator calls it synchronously between lifecycle steps.
pub trait EventBus: Send + Sync {
    fn emit(&self, event_type: EventType, payload: EventPayload);
}

/// Calls `bus.emit`, catching and logging a panic rather than letting it
/// unwind into the orchestrator. A no-op when `bus` is absent.
pub(crate) fn emit_safely(bus: Option<&dyn EventBus>, event_type: EventType, payload: EventPayload) {
    let Some(bus) = bus else { return };
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| bus.emit(event_type, payload))).is_err() {
        warn!(?event_type, "event bus subscriber panicked");
    }
}
