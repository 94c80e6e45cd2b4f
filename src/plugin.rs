//! Plugins: cross-cutting `onEffect` enhancers and extra reducers.
//!
//! A [`Plugin`] contributes two things, both optional:
//!
//! - **extra reducers**: top-level state slices keyed by their own name
//!   that observe *every* dispatched action (e.g. a shared loading flag)
//! - an **`onEffect` enhancer**: a wrapper applied around every effect
//!   invocation, composed with other enhancers in registration order
//!
//! # Composition order
//!
//! The first-registered enhancer is the outermost wrapper: its "before"
//! logic runs first and its "after" logic runs last. Enhancers are pure
//! composition: they are invoked at each dispatch with fresh arguments,
//! never at registration time. State captured by an enhancer's closures
//! persists across dispatches because the enhancer itself is registered
//! once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::action::Action;
use crate::effect::EffectFn;
use crate::model::Reducer;
use crate::store::Store;

/// Descriptor of the model owning the effect being wrapped.
///
/// Handed to enhancers so cross-cutting behavior can be keyed by namespace
/// or read the owning slice.
pub struct ModelInfo {
    namespace: String,
    store: Store,
}

impl ModelInfo {
    pub(crate) fn new(namespace: String, store: Store) -> Self {
        Self { namespace, store }
    }

    /// The owning model's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Snapshot of the owning model's state slice.
    pub fn state(&self) -> Option<Value> {
        self.store.slice(&self.namespace)
    }
}

impl fmt::Debug for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInfo")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Store access handed to enhancers.
///
/// `put` here dispatches without namespace resolution: cross-cutting
/// actions are either already qualified or global (extra-reducer) types.
#[derive(Clone)]
pub struct EnhancerContext {
    store: Store,
}

impl EnhancerContext {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Dispatch an action as-is (no namespace prefixing).
    pub fn put(&self, action: impl Into<Action>) {
        self.store.dispatch(action);
    }

    /// Snapshot of the whole state tree.
    pub fn state(&self) -> Value {
        self.store.state()
    }
}

impl fmt::Debug for EnhancerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancerContext").finish_non_exhaustive()
    }
}

/// A cross-cutting effect wrapper.
///
/// Receives the next routine in the chain, store access, the owning model,
/// and the fully-qualified effect key; returns the wrapped routine.
pub type OnEffect =
    Arc<dyn Fn(EffectFn, EnhancerContext, &ModelInfo, &str) -> EffectFn + Send + Sync>;

/// A bundle of extra reducers and/or one `onEffect` enhancer.
///
/// # Example
///
/// ```ignore
/// app.plug(Plugin::new()
///     .extra_reducer("loading", |state, action| match action.kind.as_str() {
///         "@@LOADING/SHOW" => json!(true),
///         "@@LOADING/HIDE" => json!(false),
///         _ => if state.is_null() { json!(false) } else { state },
///     })
///     .on_effect(|effect, ctx, _model, _key| {
///         Arc::new(move |action, ectx| {
///             let effect = effect.clone();
///             let ctx = ctx.clone();
///             Box::pin(async move {
///                 ctx.put(Action::new("@@LOADING/SHOW"));
///                 let result = effect(action, ectx).await;
///                 ctx.put(Action::new("@@LOADING/HIDE"));
///                 result
///             })
///         })
///     }))?;
/// ```
pub struct Plugin {
    pub(crate) extra_reducers: BTreeMap<String, Reducer>,
    pub(crate) on_effect: Option<OnEffect>,
}

impl Plugin {
    /// An empty plugin.
    pub fn new() -> Self {
        Self {
            extra_reducers: BTreeMap::new(),
            on_effect: None,
        }
    }

    /// Add a top-level reducer that observes every dispatched action.
    ///
    /// The slice is seeded at start by applying the reducer to `Null` and
    /// a synthetic init action.
    pub fn extra_reducer<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Value, &Action) -> Value + Send + Sync + 'static,
    {
        self.extra_reducers.insert(name.into(), Arc::new(reducer));
        self
    }

    /// Set this plugin's effect enhancer.
    pub fn on_effect<F>(mut self, enhancer: F) -> Self
    where
        F: Fn(EffectFn, EnhancerContext, &ModelInfo, &str) -> EffectFn + Send + Sync + 'static,
    {
        self.on_effect = Some(Arc::new(enhancer));
        self
    }
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("extra_reducers", &self.extra_reducers.keys())
            .field("has_on_effect", &self.on_effect.is_some())
            .finish()
    }
}

/// Compose the enhancer chain around a base routine.
///
/// Folds from the last-registered enhancer inward so the first-registered
/// one ends up outermost. Called once per dispatch (and once per watcher
/// spawn) with fresh context arguments.
pub(crate) fn compose(
    enhancers: &[OnEffect],
    base: EffectFn,
    ctx: EnhancerContext,
    model: &ModelInfo,
    key: &str,
) -> EffectFn {
    let mut wrapped = base;
    for enhancer in enhancers.iter().rev() {
        wrapped = enhancer(wrapped, ctx.clone(), model, key);
    }
    wrapped
}
