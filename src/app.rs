//! Application assembly: models in, plugins on, store out.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::action::{Action, ActionBus, INIT_ACTION, NAMESPACE_SEP};
use crate::error::{EffectFailure, ErrorHook, ModelError};
use crate::model::{Model, Reducer, ReducerMap};
use crate::plugin::{OnEffect, Plugin};
use crate::policy::EffectSlot;
use crate::registry::ModelRegistry;
use crate::store::{EffectRuntime, Store};

/// Assembles models and plugins, then starts the engine.
///
/// Registration (`model`, `plug`) validates shapes synchronously; policy
/// names are resolved and watchers spawned only at [`App::start`], which
/// consumes the builder and hands back a [`Store`].
///
/// ```ignore
/// let mut app = App::new();
/// app.model(Model::new("count", 0)
///     .reducer("add", |state, _| json!(state.as_i64().unwrap_or(0) + 1))
///     .effect("addAsync", |_, ctx| async move {
///         ctx.call(fetch_step()).await?;
///         ctx.put("add");
///         Ok(())
///     }))?;
/// let store = app.start()?;
/// store.dispatch("count/addAsync");
/// ```
pub struct App {
    registry: ModelRegistry,
    extra_reducers: BTreeMap<String, Reducer>,
    enhancers: Vec<OnEffect>,
    error_hook: Option<ErrorHook>,
    bus_capacity: Option<usize>,
}

impl App {
    pub fn new() -> Self {
        Self {
            registry: ModelRegistry::new(),
            extra_reducers: BTreeMap::new(),
            enhancers: Vec::new(),
            error_hook: None,
            bus_capacity: None,
        }
    }

    /// Install the process-wide error sink.
    ///
    /// Every uncaught effect failure is delivered here exactly once. With
    /// no sink configured, an uncaught failure is fatal to the executing
    /// task.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(EffectFailure) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Override the action-bus buffer used by watcher subscriptions.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = Some(capacity);
        self
    }

    /// Register a model.
    pub fn model(&mut self, model: Model) -> Result<(), ModelError> {
        // An extra reducer already holding the top-level key makes the
        // namespace unavailable, same as another model owning it.
        if self.extra_reducers.contains_key(model.namespace()) {
            return Err(ModelError::DuplicateNamespace(
                model.namespace().to_string(),
            ));
        }
        self.registry.register(model)
    }

    /// Install a plugin: its enhancer joins the chain in call order, its
    /// extra reducers claim top-level slices.
    pub fn plug(&mut self, plugin: Plugin) -> Result<(), ModelError> {
        for (key, reducer) in plugin.extra_reducers {
            if self.extra_reducers.contains_key(&key) || self.registry.contains(&key) {
                return Err(ModelError::DuplicateExtraReducer(key));
            }
            self.extra_reducers.insert(key, reducer);
        }
        if let Some(enhancer) = plugin.on_effect {
            self.enhancers.push(enhancer);
        }
        Ok(())
    }

    /// Resolve policies, build the state tree and effect table, spawn
    /// watchers, and hand back the store.
    pub fn start(self) -> Result<Store, ModelError> {
        let models = self.registry.into_models();

        let mut initial = Map::new();
        let mut reducers: BTreeMap<String, ReducerMap> = BTreeMap::new();
        let mut effects: BTreeMap<String, EffectRuntime> = BTreeMap::new();

        for model in models {
            for (name, entry) in &model.effects {
                let key = format!("{}{NAMESPACE_SEP}{name}", model.namespace);
                let (routine, policy) = entry.normalize(&key)?;
                effects.insert(
                    key.clone(),
                    EffectRuntime {
                        namespace: model.namespace.clone(),
                        key,
                        routine,
                        policy,
                        slot: Arc::new(EffectSlot::new()),
                    },
                );
            }
            initial.insert(model.namespace.clone(), model.initial);
            reducers.insert(model.namespace, model.reducers);
        }

        // Extra-reducer slices are seeded by running each reducer against
        // a null slice and the synthetic init action.
        let init = Action::new(INIT_ACTION);
        for (name, reducer) in &self.extra_reducers {
            initial.insert(name.clone(), reducer(Value::Null, &init));
        }

        let bus = match self.bus_capacity {
            Some(capacity) => ActionBus::with_capacity(capacity),
            None => ActionBus::new(),
        };

        info!(
            models = reducers.len(),
            effects = effects.len(),
            enhancers = self.enhancers.len(),
            "app started"
        );

        let store = Store::new(
            initial,
            reducers,
            self.extra_reducers,
            effects,
            self.enhancers,
            self.error_hook,
            bus,
        );
        store.spawn_watchers();
        Ok(store)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("models", &self.registry.len())
            .field("extra_reducers", &self.extra_reducers.keys())
            .field("enhancers", &self.enhancers.len())
            .finish_non_exhaustive()
    }
}
