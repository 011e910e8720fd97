//! The Page Session state machine: one socket's worth of template, data,
//! and tree-node history, serialized through a single processing loop.

use crate::codec;
use crate::diff::{self, DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS};
use crate::error::SessionError;
use crate::key::KeyGenerator;
use crate::store::{SessionStore, Store};
use crate::tree::{render_html, Node};
use indexmap::IndexMap;
use lvt_template::{Ast, Evaluator, Value};
use serde::Serialize;
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// The key a store is registered under when a session has only one store, or
/// when an action name carries no `storeName.` prefix.
pub const DEFAULT_STORE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Open,
    Closed,
}

/// What happens to an outbound frame when a session's write side can't keep
/// up with its render rate — a runtime knob the host chooses per
/// deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop older queued frames, keeping only the most recent patch.
    CoalesceLatest,
    /// Close the session; a client this far behind is assumed disconnected.
    DropSession,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub write_deadline_millis: u64,
    pub inbound_rate_limit_per_sec: u32,
    pub max_contiguous_insertion_points: usize,
    pub key_priority_attrs: Vec<String>,
    /// Whether `"f"` fingerprints ride along on the wire (off by default; a
    /// host turns this on to let a client cache subtrees).
    pub expose_fingerprints: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            outbound_queue_capacity: 32,
            overflow_policy: OverflowPolicy::CoalesceLatest,
            write_deadline_millis: 5_000,
            inbound_rate_limit_per_sec: 50,
            max_contiguous_insertion_points: DEFAULT_MAX_CONTIGUOUS_INSERTION_POINTS,
            key_priority_attrs: Vec::new(),
            expose_fingerprints: false,
        }
    }
}

/// Outcome of a client action, sent back alongside any patch it produced.
/// A validation failure is reported here, never by closing the session.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub success: bool,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, String>,
    pub action: Option<String>,
}

impl ResponseMetadata {
    fn success(action: &str) -> Self {
        ResponseMetadata { success: true, errors: IndexMap::new(), action: Some(action.to_string()) }
    }

    fn failure(action: &str, errors: IndexMap<String, String>) -> Self {
        ResponseMetadata { success: false, errors, action: Some(action.to_string()) }
    }
}

/// One outbound message: a patch to apply, plus the metadata of whichever
/// client action produced it (`None` for a broadcast-driven re-render).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub patch: Json,
    pub meta: Option<ResponseMetadata>,
}

/// Splits `"cart.add_item"` into `("cart", "add_item")`, and a bare
/// `"add_item"` into `(DEFAULT_STORE, "add_item")` — lets sessions that
/// register more than one store route an action to the right one.
pub fn split_action_name(action: &str) -> (&str, &str) {
    match action.split_once('.') {
        Some((store, rest)) => (store, rest),
        None => (DEFAULT_STORE, action),
    }
}

/// Folds every registered store's snapshot into one root value: the default
/// (`""`-keyed) store's fields sit at the root, and every other store is
/// nested under its own name. This is how a session built from several
/// independent `Store`s presents as the single data binding the template
/// walker expects.
async fn compose_data(stores: &IndexMap<String, Arc<dyn Store>>) -> Value {
    let mut root = IndexMap::new();
    for (name, store) in stores {
        let snapshot = store.snapshot().await;
        if name.is_empty() {
            if let Value::Map(fields) = snapshot {
                for (k, v) in fields {
                    root.insert(k, v);
                }
            }
        } else {
            root.insert(name.clone(), snapshot);
        }
    }
    Value::Map(root)
}

/// A fixed-window counter backing `SessionConfig::inbound_rate_limit_per_sec`:
/// counts inbound actions within the current one-second window, resetting
/// the window (rather than sliding it) once it elapses.
struct RateLimiter {
    window_start: Instant,
    count: u32,
}

pub struct PageSession {
    state: Mutex<SessionState>,
    ast: Ast,
    evaluator: Evaluator,
    keygen: KeyGenerator,
    stores: IndexMap<String, Arc<dyn Store>>,
    session_store: Option<Arc<dyn SessionStore>>,
    config: SessionConfig,
    container_id: String,
    /// The very first tree ever sent to this client — consulted by the diff
    /// engine to decide whether a freshly-appearing hole needs its statics
    /// sent.
    initial: Mutex<Option<Node>>,
    /// The tree from the most recently applied render, diffed against on
    /// the next one.
    current: Mutex<Option<Node>>,
    outbound_tx: mpsc::Sender<Outbound>,
    rate_limiter: Mutex<RateLimiter>,
}

impl PageSession {
    pub fn new(
        ast: Ast,
        evaluator: Evaluator,
        stores: IndexMap<String, Arc<dyn Store>>,
        session_store: Option<Arc<dyn SessionStore>>,
        config: SessionConfig,
        container_id: impl Into<String>,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let keygen = KeyGenerator::new(config.key_priority_attrs.clone());
        let session = PageSession {
            state: Mutex::new(SessionState::Initializing),
            ast,
            evaluator,
            keygen,
            stores,
            session_store,
            config,
            container_id: container_id.into(),
            initial: Mutex::new(None),
            current: Mutex::new(None),
            outbound_tx,
            rate_limiter: Mutex::new(RateLimiter { window_start: Instant::now(), count: 0 }),
        };
        (session, outbound_rx)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Walks the template against the composed store data, records it as
    /// both `initial` and `current`, and returns the HTML to send as the
    /// first response.
    pub async fn render_initial(&self) -> Result<String, SessionError> {
        let data = compose_data(&self.stores).await;
        let node = crate::walker::walk_template(
            &self.ast,
            &data,
            &self.evaluator,
            &self.keygen,
            &self.container_id,
            None,
        )
        .map_err(SessionError::Evaluation)?;
        let html = render_html(&node);
        *self.initial.lock().await = Some(node.clone());
        *self.current.lock().await = Some(node);
        *self.state.lock().await = SessionState::Open;
        Ok(html)
    }

    /// Applies a client action: routes it to the matching store, re-renders,
    /// diffs against the last sent tree, and enqueues the patch. On
    /// validation failure the store is left unchanged and the baseline tree
    /// does not advance.
    pub async fn apply_action(&self, action: &str, payload: Value) -> Result<(), SessionError> {
        self.ensure_open().await?;
        self.check_rate_limit().await?;
        let (store_name, bare_action) = split_action_name(action);
        let store = self
            .stores
            .get(store_name)
            .ok_or_else(|| SessionError::Transport(format!("no store registered for `{store_name}`")))?;

        match store.change(bare_action, payload).await {
            Ok(()) => {
                self.re_render_and_diff(Some(ResponseMetadata::success(action))).await
            }
            Err(errors) => {
                self.enqueue(Outbound {
                    patch: Json::Object(Default::default()),
                    meta: Some(ResponseMetadata::failure(action, errors)),
                })
                .await
            }
        }
    }

    /// Re-renders after some external change to store state (e.g. a
    /// broadcast from another session in the same group) and enqueues the
    /// resulting patch, with no associated action metadata.
    pub async fn broadcast_tick(&self) -> Result<(), SessionError> {
        self.ensure_open().await?;
        self.re_render_and_diff(None).await
    }

    async fn re_render_and_diff(&self, meta: Option<ResponseMetadata>) -> Result<(), SessionError> {
        let data = compose_data(&self.stores).await;
        let mut current_guard = self.current.lock().await;
        let previous = current_guard.clone();
        let new_node = crate::walker::walk_template(
            &self.ast,
            &data,
            &self.evaluator,
            &self.keygen,
            &self.container_id,
            previous.as_ref(),
        )
        .map_err(SessionError::Evaluation)?;

        let initial_guard = self.initial.lock().await;
        let patch = match &previous {
            Some(old) => diff::diff(
                old,
                &new_node,
                initial_guard.as_ref(),
                self.config.max_contiguous_insertion_points,
            ),
            None => crate::patch::Patch::default(),
        };
        drop(initial_guard);
        *current_guard = Some(new_node);
        drop(current_guard);

        if patch.is_empty() && meta.is_none() {
            return Ok(());
        }
        let encoded = codec::encode_patch(&patch, self.config.expose_fingerprints);
        self.enqueue(Outbound { patch: encoded, meta }).await
    }

    /// Counts this call against the current one-second window, resetting
    /// the window if it has elapsed. Exceeding
    /// `SessionConfig::inbound_rate_limit_per_sec` is fatal for the session,
    /// same as any other `SessionError` (see `SessionError::closes_session`).
    async fn check_rate_limit(&self) -> Result<(), SessionError> {
        let mut limiter = self.rate_limiter.lock().await;
        let now = Instant::now();
        if now.duration_since(limiter.window_start) >= Duration::from_secs(1) {
            limiter.window_start = now;
            limiter.count = 0;
        }
        limiter.count += 1;
        if limiter.count > self.config.inbound_rate_limit_per_sec {
            return Err(SessionError::RateLimited);
        }
        Ok(())
    }

    async fn enqueue(&self, outbound: Outbound) -> Result<(), SessionError> {
        match self.config.overflow_policy {
            OverflowPolicy::CoalesceLatest => {
                // try_send first so a full queue doesn't block the session
                // loop; fall back to a bounded wait under the write deadline.
                if self.outbound_tx.try_send(outbound.clone()).is_ok() {
                    return Ok(());
                }
                tokio::time::timeout(
                    Duration::from_millis(self.config.write_deadline_millis),
                    self.outbound_tx.send(outbound),
                )
                .await
                .map_err(|_| SessionError::WriteTimeout)?
                .map_err(|_| SessionError::Closed)
            }
            OverflowPolicy::DropSession => match self.outbound_tx.try_send(outbound) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.close().await;
                    Err(SessionError::WriteTimeout)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Closed),
            },
        }
    }

    /// Reads an opaque per-session value, keyed by this session's container
    /// id. Unrelated to template data — the diff engine never sees it.
    pub async fn session_value(&self, key: &str) -> Option<Value> {
        let store = self.session_store.as_ref()?;
        store.get(&self.container_id, key).await
    }

    pub async fn set_session_value(&self, key: &str, value: Value) {
        if let Some(store) = &self.session_store {
            store.set(&self.container_id, key, value).await;
        }
    }

    pub async fn close(&self) {
        *self.state.lock().await = SessionState::Closed;
    }

    async fn ensure_open(&self) -> Result<(), SessionError> {
        if *self.state.lock().await == SessionState::Closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lvt_template::parser::parse;
    use tokio::sync::Mutex as TokioMutex;

    struct CounterStore {
        count: TokioMutex<i64>,
    }

    #[async_trait]
    impl Store for CounterStore {
        async fn change(&self, action: &str, _data: Value) -> Result<(), IndexMap<String, String>> {
            let mut count = self.count.lock().await;
            match action {
                "increment" => *count += 1,
                "fail" => {
                    let mut errors = IndexMap::new();
                    errors.insert("base".to_string(), "always fails".to_string());
                    return Err(errors);
                }
                _ => {}
            }
            Ok(())
        }

        async fn snapshot(&self) -> Value {
            let mut map = IndexMap::new();
            map.insert("Count".to_string(), Value::Number((*self.count.lock().await).into()));
            Value::Map(map)
        }
    }

    fn stores_with_counter() -> IndexMap<String, Arc<dyn Store>> {
        let mut stores: IndexMap<String, Arc<dyn Store>> = IndexMap::new();
        stores.insert(DEFAULT_STORE.to_string(), Arc::new(CounterStore { count: TokioMutex::new(0) }));
        stores
    }

    #[tokio::test]
    async fn render_initial_produces_html_and_opens_session() {
        let ast = parse("Count: {{.Count}}").unwrap();
        let (session, _rx) = PageSession::new(
            ast,
            Evaluator::default(),
            stores_with_counter(),
            None,
            SessionConfig::default(),
            "root",
        );
        let html = session.render_initial().await.unwrap();
        assert!(html.contains("Count: 0"));
        assert_eq!(session.state().await, SessionState::Open);
    }

    #[tokio::test]
    async fn successful_action_enqueues_patch_with_success_metadata() {
        let ast = parse("Count: {{.Count}}").unwrap();
        let (session, mut rx) = PageSession::new(
            ast,
            Evaluator::default(),
            stores_with_counter(),
            None,
            SessionConfig::default(),
            "root",
        );
        session.render_initial().await.unwrap();
        session.apply_action("increment", Value::Null).await.unwrap();
        let outbound = rx.recv().await.unwrap();
        let meta = outbound.meta.unwrap();
        assert!(meta.success);
        assert_eq!(meta.action.as_deref(), Some("increment"));
    }

    #[tokio::test]
    async fn failed_action_reports_errors_without_closing_session() {
        let ast = parse("Count: {{.Count}}").unwrap();
        let (session, mut rx) = PageSession::new(
            ast,
            Evaluator::default(),
            stores_with_counter(),
            None,
            SessionConfig::default(),
            "root",
        );
        session.render_initial().await.unwrap();
        session.apply_action("fail", Value::Null).await.unwrap();
        let outbound = rx.recv().await.unwrap();
        let meta = outbound.meta.unwrap();
        assert!(!meta.success);
        assert!(meta.errors.contains_key("base"));
        assert_eq!(session.state().await, SessionState::Open);
    }

    #[tokio::test]
    async fn unrecognized_store_prefix_errors_without_panicking() {
        let ast = parse("Count: {{.Count}}").unwrap();
        let (session, _rx) = PageSession::new(
            ast,
            Evaluator::default(),
            stores_with_counter(),
            None,
            SessionConfig::default(),
            "root",
        );
        session.render_initial().await.unwrap();
        let err = session.apply_action("cart.add_item", Value::Null).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[test]
    fn split_action_name_routes_dotted_and_bare_actions() {
        assert_eq!(split_action_name("cart.add_item"), ("cart", "add_item"));
        assert_eq!(split_action_name("increment"), (DEFAULT_STORE, "increment"));
    }

    #[tokio::test]
    async fn exceeding_inbound_rate_limit_errors() {
        let ast = parse("Count: {{.Count}}").unwrap();
        let config = SessionConfig { inbound_rate_limit_per_sec: 2, ..SessionConfig::default() };
        let (session, _rx) = PageSession::new(
            ast,
            Evaluator::default(),
            stores_with_counter(),
            None,
            config,
            "root",
        );
        session.render_initial().await.unwrap();
        session.apply_action("increment", Value::Null).await.unwrap();
        session.apply_action("increment", Value::Null).await.unwrap();
        let err = session.apply_action("increment", Value::Null).await.unwrap_err();
        assert!(matches!(err, SessionError::RateLimited));
        assert!(err.closes_session());
    }
}
