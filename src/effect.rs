//! Effect routines, their execution context, and the execution boundary.
//!
//! An effect is an asynchronous routine triggered by a dispatched action.
//! The routine receives the triggering [`Action`] and an [`EffectContext`]
//! exposing exactly three primitives:
//!
//! - [`EffectContext::call`]: await an async operation, receiving its
//!   result (or failure) back inside the routine's own control flow
//! - [`EffectContext::put`]: synchronously dispatch an action back into
//!   the store; reducers run before `put` returns
//! - [`EffectContext::take`]: watcher-only; suspend until a matching
//!   action is dispatched
//!
//! # The execution boundary
//!
//! [`run_effect`] wraps every invocation: `Err` results and panics are
//! converted to [`EffectFailure`] and delivered to the configured error
//! hook exactly once. Nothing propagates to the dispatch call site, and
//! `put`s committed before the failure point are not rolled back.
//! [`Cancelled`] resolutions (superseded `takeLatest` executions, watchers
//! whose bus closed) are discarded silently.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{trace, warn};

use crate::action::Action;
use crate::error::{Cancelled, EffectFailure, ErrorHook};
use crate::policy::{EffectSlot, Policy};
use crate::store::Store;

/// A type-erased effect routine.
///
/// Every user routine and every enhancer wrapper is carried in this form:
/// a shareable function from `(Action, EffectContext)` to a boxed future.
pub type EffectFn =
    Arc<dyn Fn(Action, EffectContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box an async closure into an [`EffectFn`].
pub fn effect_fn<F, Fut>(routine: F) -> EffectFn
where
    F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |action, ctx| Box::pin(routine(action, ctx)))
}

/// Per-invocation context handed to an effect routine.
///
/// Cheap to clone; all clones refer to the same execution (same epoch
/// token, same slot). The context knows which policy it runs under, so it
/// can reject `take` outside watchers and discard state commits from
/// superseded `takeLatest` continuations.
#[derive(Clone)]
pub struct EffectContext {
    pub(crate) store: Store,
    pub(crate) namespace: String,
    pub(crate) key: String,
    pub(crate) policy: Policy,
    pub(crate) epoch: u64,
    pub(crate) slot: Arc<EffectSlot>,
    /// Subscription opened before the watcher's task was spawned, consumed
    /// by the first `take`. Guarantees actions dispatched between `start()`
    /// and the first `take` are buffered rather than dropped.
    pub(crate) seeded_watch: Arc<Mutex<Option<Receiver<Action>>>>,
}

impl EffectContext {
    /// Namespace of the model that owns this effect.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fully-qualified `namespace/effectName` of this effect.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Snapshot of the owning model's state slice.
    pub fn state(&self) -> Option<Value> {
        self.store.slice(&self.namespace)
    }

    /// True once this execution has been superseded by a newer one.
    fn is_stale(&self) -> bool {
        self.policy == Policy::TakeLatest && self.slot.current_epoch() != self.epoch
    }

    /// Dispatch an action back into the store.
    ///
    /// Synchronous: reducers are applied and subscribers notified before
    /// this returns, so state reads after a `put` observe the transition.
    /// Unqualified action types are resolved against this effect's own
    /// namespace first (see the store's routing rules). A superseded
    /// `takeLatest` execution's `put` is discarded silently.
    pub fn put(&self, action: impl Into<Action>) {
        let action = action.into();
        if self.is_stale() {
            trace!(key = %self.key, kind = %action.kind, "discarding put from superseded execution");
            return;
        }
        let action = self.store.resolve(&self.namespace, action);
        self.store.dispatch(action);
    }

    /// Await an async operation from inside the routine.
    ///
    /// The routine suspends until the operation completes, then resumes
    /// with its result; a failure is returned into the routine's control
    /// flow so it can be caught or propagated with `?`. If this execution
    /// was superseded while suspended, the call resolves to [`Cancelled`]
    /// instead of the operation's result.
    pub async fn call<T, Fut>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if self.is_stale() {
            return Err(Cancelled.into());
        }
        let result = operation.await;
        if self.is_stale() {
            return Err(Cancelled.into());
        }
        result
    }

    /// Suspend until an action of exactly the given type is dispatched.
    ///
    /// Only valid inside `watcher` effects. The first `take` consumes a
    /// subscription opened before the watcher task was spawned, so actions
    /// dispatched as soon as `start()` returns are buffered for it. Later
    /// takes subscribe at call time: actions dispatched while the watcher
    /// body is running between takes are dropped (the watcher serializes
    /// on its own loop).
    pub async fn take(&self, kind: &str) -> Result<Action> {
        if self.policy != Policy::Watcher {
            bail!(
                "take is only available inside watcher effects (`{}` runs under {})",
                self.key,
                self.policy
            );
        }
        let seeded = self
            .seeded_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut rx = match seeded {
            Some(rx) => rx,
            None => self.store.action_bus().watch(),
        };
        loop {
            match rx.recv().await {
                Ok(action) if action.kind == kind => return Ok(action),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(key = %self.key, missed, "watcher lagged, missed actions");
                    continue;
                }
                Err(RecvError::Closed) => return Err(Cancelled.into()),
            }
        }
    }
}

impl std::fmt::Debug for EffectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Run one effect invocation inside the error interception boundary.
///
/// Failures never propagate to the caller: `Err` results and panics become
/// an [`EffectFailure`] handed to the hook. Without a configured hook an
/// uncaught failure is fatal to the executing task (silent swallowing
/// with no sink at all is worse than crashing).
pub(crate) async fn run_effect(
    routine: EffectFn,
    action: Action,
    ctx: EffectContext,
    hook: Option<ErrorHook>,
) {
    let namespace = ctx.namespace.clone();
    let key = ctx.key.clone();

    let outcome = AssertUnwindSafe(routine(action.clone(), ctx)).catch_unwind().await;

    let source = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) if err.is::<Cancelled>() => {
            trace!(key = %key, "effect execution cancelled");
            return;
        }
        Ok(Err(err)) => err,
        Err(panic) => anyhow!("effect panicked: {}", panic_message(panic)),
    };

    let failure = EffectFailure {
        namespace,
        action,
        source,
    };
    match hook {
        Some(hook) => hook(failure),
        None => panic!("uncaught effect failure with no error hook configured: {failure}"),
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
