//! The store: state tree, dispatch path, effect triggering.
//!
//! One store per started app. Dispatch is synchronous through the reducer
//! pass and subscriber notification; effect execution is spawned onto the
//! runtime afterwards. The store is cheap to clone and every clone shares
//! the same state tree, effect table, and action bus.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::action::{Action, ActionBus, NAMESPACE_SEP};
use crate::effect::{run_effect, EffectContext, EffectFn};
use crate::error::ErrorHook;
use crate::model::{Reducer, ReducerMap};
use crate::plugin::{compose, EnhancerContext, ModelInfo, OnEffect};
use crate::policy::{EffectSlot, Policy};

/// A subscriber invoked after every reducer pass.
pub type Listener = Arc<dyn Fn(&Action) + Send + Sync>;

/// One entry of the effect table: a normalized effect bound to its slot.
pub(crate) struct EffectRuntime {
    pub(crate) namespace: String,
    pub(crate) key: String,
    pub(crate) routine: EffectFn,
    pub(crate) policy: Policy,
    pub(crate) slot: Arc<EffectSlot>,
}

struct StoreInner {
    state: Mutex<Map<String, Value>>,
    reducers: BTreeMap<String, ReducerMap>,
    extra_reducers: BTreeMap<String, Reducer>,
    effects: BTreeMap<String, EffectRuntime>,
    enhancers: Vec<OnEffect>,
    error_hook: Option<ErrorHook>,
    bus: ActionBus,
    listeners: Mutex<Vec<Listener>>,
    warned: Mutex<BTreeSet<String>>,
}

/// Handle to a started app: dispatch, state reads, subscriptions.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub(crate) fn new(
        initial: Map<String, Value>,
        reducers: BTreeMap<String, ReducerMap>,
        extra_reducers: BTreeMap<String, Reducer>,
        effects: BTreeMap<String, EffectRuntime>,
        enhancers: Vec<OnEffect>,
        error_hook: Option<ErrorHook>,
        bus: ActionBus,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(initial),
                reducers,
                extra_reducers,
                effects,
                enhancers,
                error_hook,
                bus,
                listeners: Mutex::new(Vec::new()),
                warned: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Dispatch an action.
    ///
    /// The reducer pass and subscriber notification complete before this
    /// returns. Matching effects are spawned onto the runtime and execute
    /// concurrently with the caller. Re-entrant dispatch (an effect's `put`
    /// arriving while its trigger is still unwinding) is supported.
    pub fn dispatch(&self, action: impl Into<Action>) {
        let action = action.into();
        let matched = self.reduce(&action);

        let listeners: Vec<Listener> = {
            let guard = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.clone()
        };
        for listener in listeners {
            listener(&action);
        }

        self.inner.bus.broadcast(action.clone());
        self.trigger(&action, matched);
    }

    /// Apply the action to its namespace's reducer and to every extra
    /// reducer. Returns whether a model reducer matched.
    fn reduce(&self, action: &Action) -> bool {
        let mut matched = false;
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(ns) = action.namespace() {
            let local = &action.kind[ns.len() + 1..];
            if let Some(reducer) = self.inner.reducers.get(ns).and_then(|m| m.get(local)) {
                let slice = state.get(ns).cloned().unwrap_or(Value::Null);
                state.insert(ns.to_string(), reducer(slice, action));
                matched = true;
            }
        }

        for (name, reducer) in &self.inner.extra_reducers {
            let slice = state.get(name).cloned().unwrap_or(Value::Null);
            state.insert(name.clone(), reducer(slice, action));
        }

        matched
    }

    /// Spawn the effect owning this action type, if any.
    fn trigger(&self, action: &Action, matched_reducer: bool) {
        let Some(runtime) = self.inner.effects.get(&action.kind) else {
            // A qualified action that hits a known namespace but matches
            // nothing is usually a typo. Live watchers may still consume
            // it, so stay quiet while any are subscribed.
            if let Some(ns) = action.namespace() {
                if !matched_reducer
                    && self.inner.reducers.contains_key(ns)
                    && self.inner.bus.watcher_count() == 0
                    && self.warn_once(&action.kind)
                {
                    warn!(kind = %action.kind, "action matches no reducer or effect in its namespace");
                }
            }
            return;
        };

        let epoch = match runtime.policy {
            Policy::TakeEvery => runtime.slot.current_epoch(),
            Policy::TakeLatest => runtime.slot.supersede(),
            // Watchers are spawned at start, never from the table.
            Policy::Watcher => return,
        };
        debug!(key = %runtime.key, policy = %runtime.policy, "spawning effect");

        let wrapped = self.composed(runtime);
        let ctx = self.context(runtime, epoch, None);
        let handle = spawn_eager(Box::pin(run_effect(
            wrapped,
            action.clone(),
            ctx,
            self.inner.error_hook.clone(),
        )));
        if runtime.policy == Policy::TakeLatest {
            if let Some(handle) = handle {
                runtime.slot.track(handle);
            }
        }
    }

    /// Spawn a watcher effect; it runs for the store's lifetime.
    ///
    /// The bus subscription is opened here, before the task exists, so an
    /// action dispatched as soon as `start()` returns is already buffered
    /// when the watcher reaches its first `take`.
    fn spawn_watcher(&self, runtime: &EffectRuntime) {
        debug!(key = %runtime.key, "spawning watcher");
        let seeded = self.inner.bus.watch();
        let wrapped = self.composed(runtime);
        let ctx = self.context(runtime, runtime.slot.current_epoch(), Some(seeded));
        // Watchers are not triggered by a dispatch; they receive a
        // synthetic action carrying their own key.
        let action = Action::new(runtime.key.clone());
        spawn_eager(Box::pin(run_effect(
            wrapped,
            action,
            ctx,
            self.inner.error_hook.clone(),
        )));
    }

    /// Build the enhancer-wrapped routine for one invocation.
    ///
    /// Composition happens here, per dispatch, so every enhancer is invoked
    /// with fresh arguments each time an effect fires.
    fn composed(&self, runtime: &EffectRuntime) -> EffectFn {
        if self.inner.enhancers.is_empty() {
            return runtime.routine.clone();
        }
        let model = ModelInfo::new(runtime.namespace.clone(), self.clone());
        compose(
            &self.inner.enhancers,
            runtime.routine.clone(),
            EnhancerContext::new(self.clone()),
            &model,
            &runtime.key,
        )
    }

    fn context(
        &self,
        runtime: &EffectRuntime,
        epoch: u64,
        seeded_watch: Option<tokio::sync::broadcast::Receiver<Action>>,
    ) -> EffectContext {
        EffectContext {
            store: self.clone(),
            namespace: runtime.namespace.clone(),
            key: runtime.key.clone(),
            policy: runtime.policy,
            epoch,
            slot: runtime.slot.clone(),
            seeded_watch: Arc::new(Mutex::new(seeded_watch)),
        }
    }

    /// Resolve an action type emitted from inside `namespace`.
    ///
    /// Unqualified types are prefixed with the emitting namespace when the
    /// namespace owns a matching reducer or effect; otherwise the action is
    /// dispatched globally (with a one-time warning, since this is usually
    /// a typo rather than a deliberate cross-namespace put). A type
    /// redundantly qualified with its own namespace also warns once.
    pub(crate) fn resolve(&self, namespace: &str, action: Action) -> Action {
        if action.is_qualified() {
            if action.namespace() == Some(namespace)
                && self.warn_once(&format!("{namespace}!{}", action.kind))
            {
                warn!(
                    namespace,
                    kind = %action.kind,
                    "put action should not be qualified with its own namespace"
                );
            }
            return action;
        }

        let qualified = format!("{namespace}{NAMESPACE_SEP}{}", action.kind);
        let owns = self
            .inner
            .reducers
            .get(namespace)
            .is_some_and(|m| m.contains_key(&action.kind))
            || self.inner.effects.contains_key(&qualified);
        if owns {
            return Action {
                kind: qualified,
                payload: action.payload,
            };
        }

        if self.warn_once(&format!("{namespace}?{}", action.kind)) {
            warn!(
                namespace,
                kind = %action.kind,
                "unqualified put matches nothing in its namespace, dispatching globally"
            );
        }
        action
    }

    /// Record a warning key; true the first time it is seen.
    fn warn_once(&self, key: &str) -> bool {
        self.inner
            .warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }

    /// Snapshot of the whole state tree.
    pub fn state(&self) -> Value {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Value::Object(state.clone())
    }

    /// Snapshot of one namespace's slice.
    pub fn slice(&self, namespace: &str) -> Option<Value> {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.get(namespace).cloned()
    }

    /// Register a subscriber invoked after every reducer pass.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Spawn every watcher in the effect table. Called once at start.
    pub(crate) fn spawn_watchers(&self) {
        for runtime in self.inner.effects.values() {
            if runtime.policy == Policy::Watcher {
                self.spawn_watcher(runtime);
            }
        }
    }

    pub(crate) fn action_bus(&self) -> &ActionBus {
        &self.inner.bus
    }
}

/// Run an effect invocation to its first suspension point synchronously,
/// handing the remainder to the runtime.
///
/// The prefix of a routine up to its first `.await` (including enhancer
/// `put`s) lands before `dispatch` returns; a routine with no suspension
/// completes inline and nothing is spawned.
fn spawn_eager(mut invocation: BoxFuture<'static, ()>) -> Option<JoinHandle<()>> {
    let mut cx = Context::from_waker(noop_waker_ref());
    match invocation.as_mut().poll(&mut cx) {
        Poll::Ready(()) => None,
        // The spawned task is polled from the top with a real waker, so
        // any registration made against the noop waker is replaced.
        Poll::Pending => Some(tokio::spawn(invocation)),
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("namespaces", &self.inner.reducers.keys())
            .field("effects", &self.inner.effects.keys())
            .finish_non_exhaustive()
    }
}
