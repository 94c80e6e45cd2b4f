//! Error taxonomy for registration, start-up, and effect execution.
//!
//! # The Error Boundary Rule
//!
//! > **No effect failure ever reaches the dispatch call site.**
//!
//! - [`ModelError`] covers programmer errors: raised synchronously at
//!   `model()`, `plug()`, or `start()`, never swallowed, never retried.
//! - [`EffectFailure`] covers runtime failures inside effects: always caught
//!   by the execution boundary and funneled to the configured error hook.
//!   `anyhow` is the internal transport; the hook is the only place it
//!   surfaces.
//! - [`Cancelled`] is a silent marker: a superseded `takeLatest` execution
//!   or a watcher whose bus closed resolves to it, and the boundary discards
//!   it without invoking the hook.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::action::Action;

/// Programmer errors surfaced at registration or start time.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A model was registered without a namespace.
    #[error("app.model: namespace should be defined")]
    MissingNamespace,

    /// Two models claimed the same namespace.
    #[error("app.model: duplicate namespace `{0}`")]
    DuplicateNamespace(String),

    /// A type-erased reducers/effects field was not a name-to-entry map.
    #[error("app.model: {field} should be Object")]
    InvalidModelShape {
        /// Which field had the wrong shape (`"reducers"` or `"effects"`).
        field: &'static str,
    },

    /// Two plugins registered an extra reducer under the same key, or an
    /// extra reducer key collided with a model namespace.
    #[error("app.use: duplicate extra reducer `{0}`")]
    DuplicateExtraReducer(String),

    /// An effect declared a policy outside the recognized set.
    #[error("app.start: `{key}`: effect type should be takeEvery, takeLatest or watcher")]
    InvalidEffectDescriptor {
        /// Fully-qualified `namespace/effectName` of the offending entry.
        key: String,
    },
}

/// Marker for executions abandoned by the policy controller.
///
/// A `takeLatest` continuation that resumes after being superseded resolves
/// its pending `call` to this error; the execution boundary recognizes it
/// and drops the execution silently instead of reporting a failure.
#[derive(Debug, Error)]
#[error("effect cancelled")]
pub struct Cancelled;

/// An uncaught failure raised during effect execution.
///
/// This is the only error shape that crosses the engine boundary: it is
/// handed to the process-wide error hook together with the triggering
/// action and the owning namespace, and it is never re-raised to the
/// dispatch call site. State already committed through `put` before the
/// failure point is not rolled back.
#[derive(Debug)]
pub struct EffectFailure {
    /// Namespace of the model that owns the failing effect.
    pub namespace: String,
    /// The action that triggered the execution.
    pub action: Action,
    /// The underlying error.
    pub source: anyhow::Error,
}

impl EffectFailure {
    /// The failure message, as seen by error hooks.
    pub fn message(&self) -> String {
        self.source.to_string()
    }
}

impl fmt::Display for EffectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "effect for `{}` in namespace `{}` failed: {}",
            self.action.kind, self.namespace, self.source
        )
    }
}

/// Process-wide error sink, configured once at construction.
///
/// Invoked exactly once per uncaught failure. The hook must not panic;
/// a panicking hook is a fatal configuration error and takes the executing
/// task down with it.
pub type ErrorHook = Arc<dyn Fn(EffectFailure) + Send + Sync>;
