//! Server side sessions with a sliding expiry window.
//!
//! The store is created once when the server starts and lives as long as
//! anything holds it, there is no explicit teardown. Entries expire
//! independently: an entry not accessed for the configured timeout is
//! treated as gone and removed lazily on the next access, or in bulk by
//! [`SessionStore::purge_expired`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Session {
    last_access: Instant,
    attributes: HashMap<String, String>,
}

impl Session {
    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_access.elapsed() >= timeout
    }
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self { sessions: DashMap::new(), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates an empty session and returns its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.sessions.insert(id.clone(), Session { last_access: Instant::now(), attributes: HashMap::new() });
        debug!(session = %id, "session created");
        id
    }

    /// Runs `f` on a live session, refreshing its expiry window.
    fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        if self.sessions.remove_if(id, |_, session| session.is_expired(self.timeout)).is_some() {
            debug!(session = %id, "session expired");
            return None;
        }
        let mut session = self.sessions.get_mut(id)?;
        session.last_access = Instant::now();
        Some(f(session.value_mut()))
    }

    /// Whether the session exists and has not expired, refreshing it if so.
    pub fn touch(&self, id: &str) -> bool {
        self.with_session(id, |_| ()).is_some()
    }

    pub fn attribute(&self, id: &str, key: &str) -> Option<String> {
        self.with_session(id, |session| session.attributes.get(key).cloned()).flatten()
    }

    /// Sets an attribute, returns `false` if the session is unknown or expired.
    pub fn set_attribute(&self, id: &str, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.with_session(id, |session| {
            session.attributes.insert(key.into(), value.into());
        })
        .is_some()
    }

    pub fn remove_attribute(&self, id: &str, key: &str) -> Option<String> {
        self.with_session(id, |session| session.attributes.remove(key)).flatten()
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Removes every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(self.timeout));
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_round_trip() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();

        assert!(store.set_attribute(&id, "user", "alice"));
        assert_eq!(store.attribute(&id, "user").as_deref(), Some("alice"));
        assert_eq!(store.remove_attribute(&id, "user").as_deref(), Some("alice"));
        assert!(store.attribute(&id, "user").is_none());
    }

    #[test]
    fn unknown_session_is_rejected() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(!store.touch("missing"));
        assert!(!store.set_attribute("missing", "k", "v"));
    }

    #[test]
    fn expired_sessions_disappear() {
        let store = SessionStore::new(Duration::ZERO);
        let first = store.create();
        let _second = store.create();

        assert!(!store.touch(&first));
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn invalidate_removes_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();
        assert!(store.invalidate(&id));
        assert!(!store.invalidate(&id));
    }
}
