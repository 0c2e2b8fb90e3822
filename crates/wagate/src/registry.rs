use crate::error::{GatewayError, Result};
use crate::protocol::ConnectionHandle;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a session is in its pairing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unpaired,
    AwaitingPairing,
    Paired,
    Disconnected,
    LoggedOut,
}

/// A registry entry: one linked account and its live connection.
#[derive(Clone)]
pub struct Session {
    pub key: String,
    pub connection: ConnectionHandle,
    pub state: SessionState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("logged_in", &self.connection.is_logged_in())
            .finish()
    }
}

/// Concurrent map from session key to live connection.
///
/// The only place that knows whether a session is attached. Writes are
/// last-write-wins per key; replacing a handle hands the old one back to the
/// caller, who is responsible for disconnecting it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The connection installed for `key`, cloned so the caller doesn't hold the map entry.
    pub fn get(&self, key: &str) -> Option<ConnectionHandle> {
        self.sessions.get(key).map(|s| s.connection.clone())
    }

    pub fn state(&self, key: &str) -> Option<SessionState> {
        self.sessions.get(key).map(|s| s.state)
    }

    /// Install `connection` for `key`, returning the handle it replaced.
    pub fn set(
        &self,
        key: impl Into<String>,
        connection: ConnectionHandle,
        state: SessionState,
    ) -> Option<ConnectionHandle> {
        let key = key.into();
        let session = Session {
            key: key.clone(),
            connection,
            state,
        };
        self.sessions.insert(key, session).map(|old| old.connection)
    }

    /// Move an existing entry to `state`. Returns false if `key` is absent.
    pub fn set_state(&self, key: &str, state: SessionState) -> bool {
        match self.sessions.get_mut(key) {
            Some(mut session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    /// Like [`SessionRegistry::set_state`] but only while `connection` is still
    /// the installed handle.
    pub fn set_state_if_current(
        &self,
        key: &str,
        connection: &ConnectionHandle,
        state: SessionState,
    ) -> bool {
        match self.sessions.get_mut(key) {
            Some(mut session) if Arc::ptr_eq(&session.connection, connection) => {
                session.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<Session> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Remove the entry for `key` only if `predicate` holds, atomically.
    pub fn remove_if(
        &self,
        key: &str,
        predicate: impl FnOnce(&Session) -> bool,
    ) -> Option<Session> {
        self.sessions
            .remove_if(key, |_, session| predicate(session))
            .map(|(_, session)| session)
    }

    /// Point-in-time copy of every key and its handle.
    pub fn list(&self) -> HashMap<String, ConnectionHandle> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.connection.clone()))
            .collect()
    }

    /// The handle for `key` if it is logged in upstream.
    pub fn logged_in(&self, key: &str) -> Result<ConnectionHandle> {
        match self.get(key) {
            Some(connection) if connection.is_logged_in() => Ok(connection),
            _ => Err(GatewayError::UnauthenticatedSession(key.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
