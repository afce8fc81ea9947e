//! Session tracker — one record per in-flight routed request.
//!
//! A session starts when the router admits a request and ends when the
//! request finishes, whatever the outcome. `SessionGuard` ties the end to a
//! drop so cancelled requests cannot leak records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;

/// Metadata about one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Random 128-bit id, hex encoded.
    pub id: String,
    pub remote_addr: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session and return a copy of it.
    pub fn begin(&self, remote_addr: &str) -> Session {
        let now = Utc::now();
        loop {
            let id = new_session_id();
            // Vacant-only insert keeps ids unique among live sessions.
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Session {
                    id: id.clone(),
                    remote_addr: remote_addr.to_string(),
                    started_at: now,
                    last_seen: now,
                };
                slot.insert(session.clone());
                tracing::debug!(session = %id, remote = remote_addr, "session started");
                return session;
            }
        }
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn end(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::debug!(session = id, "session ended");
        }
    }

    /// Refresh `last_seen` on a live session.
    pub fn touch(&self, id: &str) {
        if let Some(mut s) = self.sessions.get_mut(id) {
            s.last_seen = Utc::now();
        }
    }

    /// Begin a session that ends when the returned guard is dropped.
    pub fn guard(&self, remote_addr: &str) -> SessionGuard {
        let session = self.begin(remote_addr);
        SessionGuard {
            tracker: self.clone(),
            id: session.id,
        }
    }

    /// Number of sessions in flight.
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Copy of every live session, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

/// Ends its session on drop.
pub struct SessionGuard {
    tracker: SessionTracker,
    id: String,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        self.tracker.touch(&self.id);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.end(&self.id);
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
