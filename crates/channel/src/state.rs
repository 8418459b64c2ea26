//! Session state shared by the send and receive paths.
//!
//! State, session id and the local/remote nodes live behind one mutex so a
//! send-path state check never observes a partially applied session.

use std::sync::{Mutex, MutexGuard, PoisonError};

use protocol::{Node, Session, SessionState};

use crate::error::{ChannelError, Result};

/// A consistent view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub local_node: Option<Node>,
    pub remote_node: Option<Node>,
}

/// The session state of a channel.
#[derive(Debug)]
pub struct SessionContext {
    inner: Mutex<SessionSnapshot>,
}

impl SessionContext {
    /// Creates a context in `state` with no session id and no nodes.
    pub fn new(state: SessionState) -> Self {
        Self::resumed(state, None, None, None)
    }

    /// Creates a context for an already negotiated session.
    pub fn resumed(
        state: SessionState,
        session_id: Option<String>,
        local_node: Option<Node>,
        remote_node: Option<Node>,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionSnapshot {
                state,
                session_id,
                local_node,
                remote_node,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    pub fn local_node(&self) -> Option<Node> {
        self.lock().local_node.clone()
    }

    pub fn remote_node(&self) -> Option<Node> {
        self.lock().remote_node.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    /// Fails with [`ChannelError::InvalidState`] unless the state is `expected`.
    pub fn ensure(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(ChannelError::invalid_state(operation, state));
        }
        Ok(())
    }

    /// Like [`ensure`](Self::ensure), also returning the session id.
    pub fn ensure_with_id(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<Option<String>> {
        let inner = self.lock();
        if inner.state != expected {
            return Err(ChannelError::invalid_state(operation, inner.state));
        }
        Ok(inner.session_id.clone())
    }

    /// Applies a received session envelope and returns the previous state.
    ///
    /// State and session id are always replaced. The nodes are taken from
    /// the envelope addresses when the session becomes established.
    pub fn apply(&self, session: &Session) -> SessionState {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = session.state;
        inner.session_id = session.header.id.clone();
        if session.state == SessionState::Established {
            inner.local_node = session.header.to.clone();
            inner.remote_node = session.header.from.clone();
        }
        previous
    }
}
