// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session table: active debugger attachments keyed by opaque id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::driver::DebuggerDriver;
use crate::error::{Error, Result};
use crate::provision::RemoteTarget;

/// Lifecycle of a session. Entries only appear in the table at `Ready`;
/// the earlier phases live on the allocation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocating,
    Preparing,
    Connecting,
    Ready,
    Executing,
    Stopping,
    Closed,
}

/// Immutable facts about an attachment.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: String,
    pub agent_id: String,
    pub device_id: String,
    pub remote_host: String,
    pub remote_port: u16,
    pub target: RemoteTarget,
    pub driver_pid: i32,
    /// Always true in v1; kept for the local-target extension point.
    pub is_remote: bool,
}

/// A live session. The driver mutex serializes commands on the PTY; it is
/// `Option` so teardown can take the driver out exactly once.
pub struct SessionHandle {
    pub meta: SessionMeta,
    pub state: RwLock<SessionState>,
    pub driver: Mutex<Option<Box<dyn DebuggerDriver>>>,
}

impl SessionHandle {
    pub fn new(meta: SessionMeta, driver: Box<dyn DebuggerDriver>) -> Self {
        Self { meta, state: RwLock::new(SessionState::Ready), driver: Mutex::new(Some(driver)) }
    }
}

/// Opaque session id: `dbg_` plus a v4 UUID without hyphens.
pub fn generate_session_id() -> String {
    format!("dbg_{}", uuid::Uuid::new_v4().simple())
}

/// The session table. Guarded by its own mutex, never held across I/O:
/// lookups clone the `Arc` and release immediately.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionTable {
    pub async fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.lock().await.insert(handle.meta.session_id.clone(), handle);
    }

    /// Fetch a session, validating that `agent_id` owns it.
    pub async fn get_owned(&self, session_id: &str, agent_id: &str) -> Result<Arc<SessionHandle>> {
        let sessions = self.sessions.lock().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found(format!("session not found: {session_id}")))?;
        if handle.meta.agent_id != agent_id {
            return Err(Error::forbidden(format!(
                "session {session_id} is owned by a different agent"
            )));
        }
        Ok(Arc::clone(handle))
    }

    /// Remove a session, validating ownership. Removal-then-teardown makes
    /// double stop observable as `NotFound` rather than a double kill.
    pub async fn remove_owned(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> Result<Arc<SessionHandle>> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found(format!("session not found: {session_id}")))?;
        if handle.meta.agent_id != agent_id {
            return Err(Error::forbidden(format!(
                "session {session_id} is owned by a different agent"
            )));
        }
        sessions
            .remove(session_id)
            .ok_or_else(|| Error::internal("session vanished during removal"))
    }

    /// Drain every session owned by `agent_id`.
    pub async fn remove_all_for(&self, agent_id: &str) -> Vec<Arc<SessionHandle>> {
        let mut sessions = self.sessions.lock().await;
        let ids: Vec<String> = sessions
            .iter()
            .filter(|(_, h)| h.meta.agent_id == agent_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    /// Drain the whole table (orchestrator shutdown).
    pub async fn drain(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().await.drain().map(|(_, h)| h).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
