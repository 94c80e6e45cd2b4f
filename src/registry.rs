//! Model registration and shape validation.
//!
//! Registration is side-effect free: it validates the model's shape and
//! records it. Policy names are resolved and the effect table is built
//! later, at [`crate::app::App::start`].

use serde_json::Value;
use tracing::debug;

use crate::error::ModelError;
use crate::model::{EffectMap, Model, ReducerMap};

/// A model whose type-erased fields survived downcast validation.
pub(crate) struct RegisteredModel {
    pub(crate) namespace: String,
    pub(crate) initial: Value,
    pub(crate) reducers: ReducerMap,
    pub(crate) effects: EffectMap,
}

/// Ordered collection of registered models, unique by namespace.
#[derive(Default)]
pub(crate) struct ModelRegistry {
    models: Vec<RegisteredModel>,
}

impl ModelRegistry {
    pub(crate) fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Validate and record a model.
    ///
    /// Fails when the namespace is empty or already taken, or when a
    /// type-erased field is not the expected map type.
    pub(crate) fn register(&mut self, model: Model) -> Result<(), ModelError> {
        if model.namespace.is_empty() {
            return Err(ModelError::MissingNamespace);
        }
        if self.contains(&model.namespace) {
            return Err(ModelError::DuplicateNamespace(model.namespace));
        }

        let reducers = model
            .reducers
            .downcast::<ReducerMap>()
            .map_err(|_| ModelError::InvalidModelShape { field: "reducers" })?;
        let effects = model
            .effects
            .downcast::<EffectMap>()
            .map_err(|_| ModelError::InvalidModelShape { field: "effects" })?;

        debug!(
            namespace = %model.namespace,
            reducers = reducers.len(),
            effects = effects.len(),
            "model registered"
        );

        self.models.push(RegisteredModel {
            namespace: model.namespace,
            initial: model.state,
            reducers: *reducers,
            effects: *effects,
        });
        Ok(())
    }

    pub(crate) fn contains(&self, namespace: &str) -> bool {
        self.models.iter().any(|m| m.namespace == namespace)
    }

    pub(crate) fn len(&self) -> usize {
        self.models.len()
    }

    pub(crate) fn into_models(self) -> Vec<RegisteredModel> {
        self.models
    }
}
