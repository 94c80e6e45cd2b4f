//! Model declarations: namespaced state, reducers, and effect entries.
//!
//! A [`Model`] owns one slice of the state tree plus the reducers and
//! effects that operate on it. Models are declared before the app starts
//! and are immutable afterwards.
//!
//! # Type-erased fields
//!
//! The `reducers` and `effects` fields travel type-erased
//! (`Box<dyn Any + Send>`) so that models assembled by dynamically typed
//! hosts can be validated at registration time: a value that is not a
//! name-to-entry map fails with [`ModelError::InvalidModelShape`] instead
//! of being silently accepted. The builder methods always produce the
//! correct shape.
//!
//! # Effect descriptors
//!
//! An effect entry is either a bare routine (default `takeEvery` policy) or
//! a routine paired with a declared policy name. Policy names are resolved
//! only at `start()` (registration stays side-effect-free), so an unknown
//! name like `"nonvalid"` is accepted by `model()` and rejected by
//! `start()` with a message naming the recognized set.

use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::action::Action;
use crate::effect::{effect_fn, EffectContext, EffectFn};
use crate::error::ModelError;
use crate::policy::Policy;

/// A pure synchronous state transition: `(slice, action) -> slice`.
pub type Reducer = Arc<dyn Fn(Value, &Action) -> Value + Send + Sync>;

/// Name-to-reducer map, the expected shape of a model's `reducers` field.
pub type ReducerMap = BTreeMap<String, Reducer>;

/// Name-to-entry map, the expected shape of a model's `effects` field.
pub type EffectMap = BTreeMap<String, EffectEntry>;

/// A declared (possibly not yet validated) policy name.
///
/// Conversions exist from [`Policy`] and from strings; string declarations
/// are only checked when the app starts.
#[derive(Debug, Clone)]
pub struct PolicyDecl(Cow<'static, str>);

impl PolicyDecl {
    /// The declared name, validated or not.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Resolve the declared name, failing with the descriptor error for
    /// unknown names. `key` is the fully-qualified effect name used in the
    /// error message.
    pub(crate) fn resolve(&self, key: &str) -> Result<Policy, ModelError> {
        Policy::parse(&self.0).ok_or_else(|| ModelError::InvalidEffectDescriptor {
            key: key.to_string(),
        })
    }
}

impl From<Policy> for PolicyDecl {
    fn from(policy: Policy) -> Self {
        PolicyDecl(Cow::Borrowed(policy.as_str()))
    }
}

impl From<&str> for PolicyDecl {
    fn from(name: &str) -> Self {
        PolicyDecl(Cow::Owned(name.to_string()))
    }
}

impl From<String> for PolicyDecl {
    fn from(name: String) -> Self {
        PolicyDecl(Cow::Owned(name))
    }
}

/// One entry in a model's effects map: a routine and its declared policy.
pub struct EffectEntry {
    pub(crate) routine: EffectFn,
    pub(crate) policy: PolicyDecl,
}

impl EffectEntry {
    /// A bare routine; runs under the default `takeEvery` policy.
    pub fn new<F, Fut>(routine: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            routine: effect_fn(routine),
            policy: Policy::TakeEvery.into(),
        }
    }

    /// A routine paired with an explicit policy declaration.
    pub fn with_policy<F, Fut>(routine: F, policy: impl Into<PolicyDecl>) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            routine: effect_fn(routine),
            policy: policy.into(),
        }
    }

    /// Canonicalize the entry, resolving the declared policy name.
    pub(crate) fn normalize(&self, key: &str) -> Result<(EffectFn, Policy), ModelError> {
        Ok((self.routine.clone(), self.policy.resolve(key)?))
    }
}

impl fmt::Debug for EffectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectEntry")
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}

/// A namespaced model: initial state, reducers, and effects.
///
/// # Example
///
/// ```ignore
/// let model = Model::new("count", 0)
///     .reducer("add", |state, action| {
///         json!(state.as_i64().unwrap_or(0)
///             + action.payload.as_ref().and_then(Value::as_i64).unwrap_or(1))
///     })
///     .effect("addDelay", |action: Action, ctx: EffectContext| async move {
///         ctx.call(fetch_increment()).await?;
///         ctx.put(Action::with_payload("add", action.payload.unwrap_or_default()));
///         Ok(())
///     });
/// app.model(model)?;
/// ```
pub struct Model {
    pub(crate) namespace: String,
    pub(crate) state: Value,
    pub(crate) reducers: Box<dyn Any + Send>,
    pub(crate) effects: Box<dyn Any + Send>,
}

impl Model {
    /// Create a model with the given namespace and initial state slice.
    pub fn new(namespace: impl Into<String>, state: impl Into<Value>) -> Self {
        Self {
            namespace: namespace.into(),
            state: state.into(),
            reducers: Box::new(ReducerMap::new()),
            effects: Box::new(EffectMap::new()),
        }
    }

    /// The model's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Add a reducer under the given local name.
    pub fn reducer<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Value, &Action) -> Value + Send + Sync + 'static,
    {
        if let Some(map) = self.reducers.downcast_mut::<ReducerMap>() {
            map.insert(name.into(), Arc::new(reducer));
        }
        self
    }

    /// Add an effect under the given local name with the default policy.
    pub fn effect<F, Fut>(self, name: impl Into<String>, routine: F) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.effect_entry(name, EffectEntry::new(routine))
    }

    /// Add an effect with an explicit policy declaration.
    pub fn effect_with<F, Fut>(
        self,
        name: impl Into<String>,
        routine: F,
        policy: impl Into<PolicyDecl>,
    ) -> Self
    where
        F: Fn(Action, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.effect_entry(name, EffectEntry::with_policy(routine, policy))
    }

    /// Add a pre-built effect entry.
    pub fn effect_entry(mut self, name: impl Into<String>, entry: EffectEntry) -> Self {
        if let Some(map) = self.effects.downcast_mut::<EffectMap>() {
            map.insert(name.into(), entry);
        }
        self
    }

    /// Install a type-erased reducers field.
    ///
    /// Registration fails with `InvalidModelShape` unless the value is a
    /// [`ReducerMap`]. This is the entry point for hosts that assemble
    /// models from dynamically typed declarations.
    pub fn reducers_any(mut self, reducers: Box<dyn Any + Send>) -> Self {
        self.reducers = reducers;
        self
    }

    /// Install a type-erased effects field.
    ///
    /// Registration fails with `InvalidModelShape` unless the value is an
    /// [`EffectMap`].
    pub fn effects_any(mut self, effects: Box<dyn Any + Send>) -> Self {
        self.effects = effects;
        self
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
