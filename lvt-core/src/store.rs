//! External collaborator interfaces: the application store, the session
//! store, and the authenticator. The diff engine and session state machine
//! only ever speak through these traits.

use async_trait::async_trait;
use indexmap::IndexMap;
use lvt_template::Value;

/// Holds application state for one namespace of a page: mutate in response
/// to an action, report back a current snapshot. A session may register
/// more than one store; action names route to one by a `storeName.` prefix
/// (see [`crate::session::split_action_name`]).
#[async_trait]
pub trait Store: Send + Sync {
    /// Mutates internal state in response to an action. Returns field-level
    /// validation errors without raising — a validation error is returned
    /// as data and never closes the session.
    async fn change(&self, action: &str, data: Value) -> Result<(), IndexMap<String, String>>;

    /// The store's current state, folded into the session's data snapshot
    /// before each re-render.
    async fn snapshot(&self) -> Value;
}

/// Opaque per-session key/value storage, unrelated to template data — e.g.
/// a CSRF token or a pagination cursor a host wants to persist across
/// reconnects. The diff engine never reads it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> Option<Value>;
    async fn set(&self, session_id: &str, key: &str, value: Value);
}

/// Identifies a connecting client and the broadcast group it belongs to.
/// Both are opaque strings as far as the core is concerned.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn identify(&self, request: &http::request::Parts) -> Option<String>;
    async fn group_of(&self, request: &http::request::Parts) -> Option<String>;
}
