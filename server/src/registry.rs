//! Server-side sessions: which connections exist, which have logged in, and
//! the broadcasts their lifecycle triggers.
//!
//! Every event takes the registry lock once, mutates, and queues its broadcast
//! before releasing it. Queueing never waits (see [`ConnectionHandle::send`]),
//! so holding the lock across a broadcast cannot stall other connections, and
//! every recipient observes notices in the same order.

use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::{Input, LOGIN_DIRECTIVE};
use crate::error::{ChatError, Result};
use crate::transport::{ConnectionHandle, ConnectionId};

pub const REJECT_UNAUTHENTICATED: &str = "No log-in ID detected. Terminating client";
pub const REJECT_DUPLICATE_LOGIN: &str = "You are already logged in.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(String),
}

#[derive(Debug)]
struct Session {
    handle: ConnectionHandle,
    state: SessionState,
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<ConnectionId, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_connected(&self, handle: ConnectionHandle) {
        info!("We welcome a new connection from {}", handle.addr());
        let mut sessions = self.sessions.lock();
        sessions.insert(
            handle.id(),
            Session { handle, state: SessionState::Unauthenticated },
        );
    }

    /// Applies one inbound payload from `id`. An `Err` means the payload was
    /// refused; the refusal has already been sent to the connection.
    pub fn message_received(&self, id: ConnectionId, text: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(&id) else {
            return Err(ChatError::disconnected());
        };

        let login = match Input::parse(text) {
            Input::Directive(command) if command.name == LOGIN_DIRECTIVE => {
                Some(command.login_id().map(str::to_string))
            }
            _ => None,
        };

        let current = match &session.state {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated(login_id) => Some(login_id.clone()),
        };

        match (current, login) {
            (None, Some(Some(login_id))) => {
                info!("{} logged in as {}", session.handle.addr(), login_id);
                session.state = SessionState::Authenticated(login_id.clone());
                broadcast_locked(&mut sessions, format!("{} has logged on", login_id));
                Ok(())
            }
            (None, _) => {
                warn!("Rejecting {}: traffic before login", session.handle.addr());
                let _ = session.handle.send(REJECT_UNAUTHENTICATED);
                session.handle.close();
                sessions.remove(&id);
                Err(ChatError::ProtocolViolation("message received before login"))
            }
            (Some(_), Some(_)) => {
                if session.handle.send(REJECT_DUPLICATE_LOGIN).is_err() {
                    drop_failed_locked(&mut sessions, vec![id]);
                }
                Err(ChatError::ProtocolViolation("already logged in"))
            }
            (Some(login_id), None) => {
                debug!("Message received: {} from {}", text, login_id);
                let line = format!("{} > {}", login_id, text);
                broadcast_locked(&mut sessions, line);
                Ok(())
            }
        }
    }

    pub fn client_disconnected(&self, id: ConnectionId) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.remove(&id) else {
            return;
        };
        info!("Sad to see {} leave", session.handle.addr());
        if let SessionState::Authenticated(login_id) = session.state {
            broadcast_locked(&mut sessions, format!("{} has disconnected", login_id));
        }
    }

    /// A transport error on a connection ends it exactly like a disconnect.
    pub fn client_exception(&self, id: ConnectionId, error: &ChatError) {
        warn!("Connection {} failed: {}", id, error);
        self.client_disconnected(id);
    }

    pub fn broadcast(&self, text: &str) {
        let mut sessions = self.sessions.lock();
        broadcast_locked(&mut sessions, text.to_string());
    }

    /// Forgets every connection and asks each to close. No departure notices
    /// are sent; callers announce the shutdown before calling this.
    pub fn close_all(&self) {
        let drained: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.handle.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, id: ConnectionId) -> Option<SessionState> {
        self.sessions.lock().get(&id).map(|s| s.state.clone())
    }
}

/// Sends `text` to every known connection. A recipient whose send fails is
/// treated as disconnected, which may queue its own departure notice.
fn broadcast_locked(sessions: &mut HashMap<ConnectionId, Session>, text: String) {
    let mut pending = VecDeque::from([text]);

    while let Some(text) = pending.pop_front() {
        let failed: Vec<ConnectionId> = sessions
            .iter()
            .filter(|(_, session)| session.handle.send(&text).is_err())
            .map(|(id, _)| *id)
            .collect();

        pending.extend(drop_sessions(sessions, failed));
    }
}

fn drop_failed_locked(sessions: &mut HashMap<ConnectionId, Session>, failed: Vec<ConnectionId>) {
    for notice in drop_sessions(sessions, failed) {
        broadcast_locked(sessions, notice);
    }
}

fn drop_sessions(sessions: &mut HashMap<ConnectionId, Session>, failed: Vec<ConnectionId>) -> Vec<String> {
    let mut notices = Vec::new();
    for id in failed {
        if let Some(session) = sessions.remove(&id) {
            debug!("Dropping {} after failed send", session.handle.addr());
            session.handle.close();
            if let SessionState::Authenticated(login_id) = session.state {
                notices.push(format!("{} has disconnected", login_id));
            }
        }
    }
    notices
}
