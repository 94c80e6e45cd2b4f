//! Concurrency policies and per-effect execution slots.
//!
//! Each `(namespace, effectName)` pair runs under one of three policies:
//!
//! - [`Policy::TakeEvery`]: every matching dispatch starts an independent
//!   execution; executions interleave freely.
//! - [`Policy::TakeLatest`]: a matching dispatch supersedes any in-flight
//!   execution for the same key: the old task is aborted and its epoch
//!   token invalidated, so a continuation that somehow resumes can no
//!   longer commit state.
//! - [`Policy::Watcher`]: started exactly once when the app starts; never
//!   re-triggered by the dispatch table. The routine observes the action
//!   stream itself via `take`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// The concurrency discipline governing repeated triggers of one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Start an independent execution per dispatch (the default).
    TakeEvery,
    /// Cancel the in-flight execution and restart on each dispatch.
    TakeLatest,
    /// Start once at app start; the routine loops on `take` itself.
    Watcher,
}

impl Policy {
    /// The wire name of this policy, as written in effect declarations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::TakeEvery => "takeEvery",
            Policy::TakeLatest => "takeLatest",
            Policy::Watcher => "watcher",
        }
    }

    /// Parse a declared policy name. Unknown names return `None`; the
    /// caller turns that into the start-time descriptor error.
    pub(crate) fn parse(name: &str) -> Option<Policy> {
        match name {
            "takeEvery" => Some(Policy::TakeEvery),
            "takeLatest" => Some(Policy::TakeLatest),
            "watcher" => Some(Policy::Watcher),
            _ => None,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state for one effect table entry.
///
/// The slot is the policy controller's handle on whatever is currently
/// in flight for a key: the epoch token identifies the live execution, and
/// the join handle allows `takeLatest` to abort a superseded one. Watchers
/// park their (single, permanent) task handle here as well.
pub(crate) struct EffectSlot {
    epoch: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EffectSlot {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            handle: Mutex::new(None),
        }
    }

    /// The epoch of the currently live execution.
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Abort any in-flight execution and invalidate its epoch token.
    ///
    /// Returns the fresh epoch the replacement execution must carry.
    /// Aborting is advisory (the task stops at its next suspension point);
    /// the epoch check is what guarantees a stale continuation can no
    /// longer commit state.
    pub(crate) fn supersede(&self) -> u64 {
        let taken = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = taken {
            handle.abort();
        }
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record the task backing the live execution.
    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        *self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }
}

impl fmt::Debug for EffectSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectSlot")
            .field("epoch", &self.current_epoch())
            .finish_non_exhaustive()
    }
}
