use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

pub type SessionId = i64;
pub type ConnId = u64;
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Live subscriptions, keyed by voting session. A session entry exists only
/// while it has at least one subscriber.
///
/// A plain mutex is fine here: register/unregister/broadcast each take the
/// lock for a single map operation and nothing awaits while holding it.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, HashMap<ConnId, ClientSender>>>>,
    next_conn: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the session's subscriber set and hands back the
    /// id the caller must pass to `unregister` when the socket closes.
    pub fn register(&self, session_id: SessionId, sender: ClientSender) -> ConnId {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .insert(conn_id, sender);
        conn_id
    }

    /// Removes a connection; the session entry goes with it once the set
    /// empties.
    pub fn unregister(&self, session_id: SessionId, conn_id: ConnId) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(subscribers) = sessions.get_mut(&session_id) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                sessions.remove(&session_id);
            }
        }
    }

    /// Queues `payload` on every subscriber of `session_id`. A session nobody
    /// watches is a no-op, and one dead subscriber never blocks the rest.
    pub fn broadcast(&self, session_id: SessionId, payload: &str) {
        let subscribers: Vec<ClientSender> = {
            let sessions = self.sessions.lock().unwrap();
            match sessions.get(&session_id) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => return,
            }
        };

        for sender in subscribers {
            if sender.send(payload.to_owned()).is_err() {
                tracing::debug!(session_id, "subscriber went away mid-broadcast");
            }
        }
    }
}

#[cfg(test)]
impl SessionRegistry {
    /// Number of sessions with at least one live subscriber.
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
