// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live agent connections.
//!
//! The registry never owns a transport. Each [`ConnectionHandle`] carries a
//! command sender into the connection task that owns the socket, plus a
//! cancellation token used to force the connection closed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::Command;
use crate::error::QueryError;

/// Lifecycle of a single connection. An id with no registry entry is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Connecting,
    Connected,
    Draining,
    Closed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Handle to a live agent connection.
pub struct ConnectionHandle {
    pub client_id: String,
    /// Distinguishes successive connections for the same client id.
    pub conn_id: Uuid,
    pub connected_at: Instant,
    last_activity: Mutex<Instant>,
    state: Mutex<ConnState>,
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle in the `Connecting` state. The returned receiver belongs
    /// to the task that owns the transport.
    pub fn new(
        client_id: impl Into<String>,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let now = Instant::now();
        let handle = Arc::new(Self {
            client_id: client_id.into(),
            conn_id: Uuid::new_v4(),
            connected_at: now,
            last_activity: Mutex::new(now),
            state: Mutex::new(ConnState::Connecting),
            cmd_tx,
            cancel: parent.child_token(),
        });
        (handle, cmd_rx)
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, at: Instant) {
        let mut last = self.last_activity.lock();
        if at > *last {
            *last = at;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: ConnState) {
        let mut state = self.state.lock();
        // Closed is terminal.
        if *state != ConnState::Closed {
            *state = next;
        }
    }

    /// Force the connection closed. Safe to call any number of times.
    pub fn close(&self) {
        self.set_state(ConnState::Draining);
        self.cancel.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the connection task to send the fetch directive and wait for the
    /// reply it routes back, giving up at `deadline`.
    pub async fn fetch(&self, deadline: Instant) -> Result<Bytes, QueryError> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Fetch { reply, deadline };
        tokio::time::timeout_at(deadline, self.cmd_tx.send(cmd))
            .await
            .map_err(|_| QueryError::Timeout)?
            .map_err(|_| QueryError::Transport("connection closed".to_owned()))?;

        match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => Err(QueryError::Timeout),
            Ok(Err(_)) => Err(QueryError::Transport("connection closed before reply".to_owned())),
            Ok(Ok(result)) => result,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("client_id", &self.client_id)
            .field("conn_id", &self.conn_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Authoritative mapping from client id to its live connection.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` for its client id.
    ///
    /// A handle already installed for the id is drained (closed) before the
    /// new one takes its place, so two live handles never share a key.
    /// Returns the replaced handle, if any.
    pub async fn put(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let mut entries = self.entries.write().await;
        let prev = entries.remove(&handle.client_id);
        if let Some(ref old) = prev {
            old.close();
            tracing::info!(
                client_id = %old.client_id,
                old_conn = %old.conn_id,
                new_conn = %handle.conn_id,
                "replacing existing connection"
            );
        }
        handle.set_state(ConnState::Connected);
        entries.insert(handle.client_id.clone(), handle);
        prev
    }

    pub async fn get(&self, client_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.entries.read().await.get(client_id).map(Arc::clone)
    }

    pub async fn remove(&self, client_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.entries.write().await.remove(client_id)
    }

    /// Remove the entry for `client_id` only if it is still connection
    /// `conn_id`. Returns whether an entry was removed.
    pub async fn remove_conn(&self, client_id: &str, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(client_id) {
            Some(h) if h.conn_id == conn_id => {
                entries.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Visit every entry under one exclusive lock. Entries for which `keep`
    /// returns false are removed and handed back to the caller.
    pub async fn sweep<F>(&self, mut keep: F) -> Vec<Arc<ConnectionHandle>>
    where
        F: FnMut(&str, &ConnectionHandle, Instant) -> bool,
    {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::new();
        entries.retain(|id, handle| {
            if keep(id, handle, handle.last_activity()) {
                true
            } else {
                removed.push(Arc::clone(handle));
                false
            }
        });
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.entries.read().await.values().map(Arc::clone).collect()
    }

    /// Close every live connection (used on shutdown).
    pub async fn close_all(&self) {
        for handle in self.entries.read().await.values() {
            handle.close();
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
