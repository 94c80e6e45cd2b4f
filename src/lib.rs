//! # Trellis
//!
//! An application-state runtime built around effect orchestration:
//! namespaced models own state slices and reducers, asynchronous effects
//! react to dispatched actions under explicit concurrency policies, and a
//! single error boundary keeps every failure away from the dispatch site.
//!
//! ## Core Concepts
//!
//! Trellis separates **transitions** from **work**:
//! - [`Action`] = a typed message (`"namespace/name"` plus optional payload)
//! - Reducers = pure slice transitions, applied synchronously at dispatch
//! - Effects = async routines spawned when their action type fires
//!
//! The key principle: **reducers never do IO, effects never touch state
//! directly**. An effect reads snapshots and feeds transitions back through
//! [`EffectContext::put`].
//!
//! ## Architecture
//!
//! ```text
//! store.dispatch(action)
//!     │
//!     ├─► root reducer: owning namespace slice + every extra reducer
//!     │        (synchronous, completes before dispatch returns)
//!     │
//!     ├─► subscribers notified
//!     │
//!     ├─► action bus ──► watcher effects blocked in take(kind)
//!     │
//!     └─► effect table lookup
//!              │
//!              ├─ takeEvery  ─► spawn independent task
//!              └─ takeLatest ─► abort previous task, spawn fresh epoch
//!                      │
//!                      ▼
//!              onEffect chain (first-registered outermost)
//!                      │
//!                      ▼
//!              routine(action, ctx) inside the error boundary
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Puts are synchronous** - reducers run before `put` returns
//! 2. **One namespace, one owner** - duplicate namespaces fail registration
//! 3. **Failures never escape** - `Err` and panics go to the error hook
//! 4. **Superseded work is silent** - stale `takeLatest` continuations are
//!    discarded, never reported
//! 5. **No rollback** - state committed before a failure stays committed
//!
//! ## Example
//!
//! ```ignore
//! use trellis::{App, Model, Policy};
//! use serde_json::json;
//!
//! let mut app = App::new().on_error(|failure| {
//!     eprintln!("effect failed: {failure}");
//! });
//!
//! app.model(Model::new("count", 0)
//!     .reducer("add", |state, _| json!(state.as_i64().unwrap_or(0) + 1))
//!     .effect_with("addAsync", |_, ctx| async move {
//!         ctx.call(async { Ok(tokio::time::sleep(DELAY).await) }).await?;
//!         ctx.put("add");
//!         Ok(())
//!     }, Policy::TakeLatest))?;
//!
//! let store = app.start()?;
//! store.dispatch("count/addAsync");
//! ```
//!
//! ## What This Is Not
//!
//! Trellis is **not**:
//! - A persistence layer (state is in-memory, snapshots are clones)
//! - A view framework (no rendering, no routing)
//! - A distributed system (one store, one process)
//!
//! Trellis **is**:
//! > A single-store action runtime where reducers transition, effects
//! > execute, and policies decide which executions survive.

mod action;
mod app;
mod effect;
mod error;
mod model;
mod plugin;
mod policy;
mod registry;
mod store;

#[cfg(test)]
mod effects_tests;

pub use crate::action::{Action, ActionBus, NAMESPACE_SEP};
pub use crate::app::App;
pub use crate::effect::{effect_fn, EffectContext, EffectFn};
pub use crate::error::{Cancelled, EffectFailure, ErrorHook, ModelError};
pub use crate::model::{EffectEntry, EffectMap, Model, PolicyDecl, Reducer, ReducerMap};
pub use crate::plugin::{EnhancerContext, ModelInfo, OnEffect, Plugin};
pub use crate::policy::Policy;
pub use crate::store::{Listener, Store};
