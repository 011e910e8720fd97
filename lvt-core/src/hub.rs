//! The Broadcast Hub: groups live sessions so that one store-level change
//! can be fanned out to every session whose data depends on it, without
//! session code needing to know who else is connected.

use crate::session::PageSession;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// A registry of sessions keyed by an opaque group id, as resolved by
/// `Authenticator::group_of`. Held behind an `Arc` and shared by every
/// transport connection in a process.
#[derive(Default)]
pub struct BroadcastHub {
    groups: RwLock<HashMap<String, Vec<(u64, Weak<PageSession>)>>>,
    next_id: RwLock<u64>,
}

/// A registration's handle; dropping it (or calling `unregister`) removes
/// the session from its group. Kept alive by the transport task for as long
/// as the socket is open.
pub struct Registration {
    group: String,
    id: u64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        BroadcastHub { groups: RwLock::new(HashMap::new()), next_id: RwLock::new(0) }
    }

    pub fn register(&self, group: impl Into<String>, session: &Arc<PageSession>) -> Registration {
        let group = group.into();
        let id = {
            let mut next_id = self.next_id.write();
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.groups.write().entry(group.clone()).or_default().push((id, Arc::downgrade(session)));
        Registration { group, id }
    }

    pub fn unregister(&self, registration: &Registration) {
        if let Some(members) = self.groups.write().get_mut(&registration.group) {
            members.retain(|(id, _)| *id != registration.id);
        }
    }

    /// Re-renders and enqueues a patch on every live session in `group`.
    /// Dead (dropped) sessions are pruned as they're found; a session that
    /// fails to re-render or enqueue is closed here, same as the transport
    /// read loop does for a client-initiated failure.
    pub async fn broadcast(&self, group: &str) {
        let sessions: Vec<Arc<PageSession>> = {
            let mut groups = self.groups.write();
            let Some(members) = groups.get_mut(group) else { return };
            members.retain(|(_, weak)| weak.strong_count() > 0);
            members.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for session in sessions {
            if let Err(err) = session.broadcast_tick().await {
                tracing::warn!(%group, error = %err, "broadcast tick failed for session");
                if err.closes_session() {
                    session.close().await;
                }
            }
        }
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.groups.read().get(group).map_or(0, |members| members.len())
    }
}
