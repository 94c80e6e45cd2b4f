//! Actions and the type-erased action bus.
//!
//! An [`Action`] is the single unit that flows through the store: reducers
//! match on its type, the effect table is keyed by its type, and watcher
//! effects observe the stream of dispatched actions through [`ActionBus`].
//!
//! # Guarantees
//!
//! - **At-most-once delivery** to watchers: a watcher only sees actions
//!   dispatched while it holds an active subscription (inside `take`)
//! - **In-memory only**: actions are not persisted
//! - **No replay**: lagged watchers miss actions and get a lag notice

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Separator between a namespace and a local reducer/effect name.
pub const NAMESPACE_SEP: char = '/';

/// Synthetic action applied to extra reducers to seed their initial slice.
pub(crate) const INIT_ACTION: &str = "@@trellis/INIT";

/// Default channel capacity for the action bus.
const DEFAULT_CAPACITY: usize = 1024;

/// A dispatched intent: a string type plus an optional JSON payload.
///
/// A type of the form `namespace/name` is *qualified* and routes to the
/// named reducer or effect of that namespace. An unqualified type dispatched
/// from inside an effect is resolved against the effect's own namespace
/// first (see the store's routing rules); an unqualified type dispatched at
/// the top level only reaches extra reducers and watcher `take`s.
///
/// # Example
///
/// ```ignore
/// store.dispatch(Action::with_payload("count/addDelay", 2));
/// store.dispatch(Action::new("count/reset"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Fully-qualified or bare action type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional payload carried to reducers and effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Action {
    /// Create an action with no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    /// Create an action carrying a payload.
    pub fn with_payload(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload.into()),
        }
    }

    /// True if the type carries a namespace prefix.
    pub fn is_qualified(&self) -> bool {
        self.kind.contains(NAMESPACE_SEP)
    }

    /// The namespace portion of a qualified type, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.kind.split_once(NAMESPACE_SEP).map(|(ns, _)| ns)
    }
}

impl From<&str> for Action {
    fn from(kind: &str) -> Self {
        Action::new(kind)
    }
}

impl From<String> for Action {
    fn from(kind: String) -> Self {
        Action::new(kind)
    }
}

/// Broadcast channel over dispatched actions.
///
/// Every action that goes through the store's dispatch path is broadcast
/// here after reducers have been applied. Watcher effects subscribe per
/// `take` call; anything else in the process may also observe the stream.
#[derive(Clone)]
pub struct ActionBus {
    sender: broadcast::Sender<Action>,
}

impl ActionBus {
    /// Create a new action bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new action bus with the specified capacity.
    ///
    /// The capacity determines how many actions can be buffered before a
    /// slow watcher starts lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast an action to all active watchers.
    ///
    /// Returns the number of receivers that saw the action.
    pub fn broadcast(&self, action: Action) -> usize {
        self.sender.send(action).unwrap_or(0)
    }

    /// Subscribe to actions dispatched after this call.
    ///
    /// Actions dispatched before subscription are not received.
    pub fn watch(&self) -> broadcast::Receiver<Action> {
        self.sender.subscribe()
    }

    /// Number of active subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBus")
            .field("watcher_count", &self.watcher_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_type() {
        let action = Action::new("count/add");
        assert!(action.is_qualified());
        assert_eq!(action.namespace(), Some("count"));
    }

    #[test]
    fn test_unqualified_type() {
        let action = Action::new("add");
        assert!(!action.is_qualified());
        assert_eq!(action.namespace(), None);
    }

    #[test]
    fn test_payload() {
        let action = Action::with_payload("count/add", 2);
        assert_eq!(action.payload, Some(serde_json::json!(2)));
    }

    #[test]
    fn test_serde_round_trip() {
        let action = Action::with_payload("count/add", 2);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "count/add");
        assert_eq!(json["payload"], 2);

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, "count/add");
    }

    #[test]
    fn test_serde_omits_missing_payload() {
        let json = serde_json::to_value(Action::new("count/reset")).unwrap();
        assert!(json.get("payload").is_none());
    }

    #[tokio::test]
    async fn test_broadcast_and_watch() {
        let bus = ActionBus::new();
        let mut rx = bus.watch();

        bus.broadcast(Action::with_payload("count/add", 1));

        let action = rx.recv().await.unwrap();
        assert_eq!(action.kind, "count/add");
    }

    #[tokio::test]
    async fn test_late_watcher_misses_actions() {
        let bus = ActionBus::new();

        bus.broadcast(Action::new("first"));
        let mut rx = bus.watch();
        bus.broadcast(Action::new("second"));

        let action = rx.recv().await.unwrap();
        assert_eq!(action.kind, "second");
    }

    #[tokio::test]
    async fn test_broadcast_returns_watcher_count() {
        let bus = ActionBus::new();
        assert_eq!(bus.broadcast(Action::new("a")), 0);

        let _rx = bus.watch();
        assert_eq!(bus.broadcast(Action::new("b")), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus1 = ActionBus::new();
        let bus2 = bus1.clone();

        let mut rx = bus1.watch();
        bus2.broadcast(Action::new("shared"));

        assert_eq!(rx.recv().await.unwrap().kind, "shared");
    }
}
