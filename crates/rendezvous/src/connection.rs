// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection task: the single reader of an agent's socket.
//!
//! Every inbound frame passes through [`Demux`], which decides whether it is
//! a spontaneous push (cached) or the reply to the one outstanding fetch
//! directive (handed to the waiting query). Queries never touch the socket;
//! they submit a [`Command::Fetch`] and wait on a oneshot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::QueryError;
use crate::registry::{ConnState, ConnectionHandle};
use crate::state::BridgeState;

/// Text frame sent to an agent to request its current data.
pub const FETCH_DIRECTIVE: &str = "GET_DATA";

pub type ReplyTx = oneshot::Sender<Result<Bytes, QueryError>>;

/// Requests from the query path into the connection task.
#[derive(Debug)]
pub enum Command {
    /// `deadline` is when the caller stops waiting for the reply.
    Fetch { reply: ReplyTx, deadline: Instant },
}

/// Outcome of offering a fetch to the demultiplexer.
#[derive(Debug)]
pub enum Begin {
    /// Slot taken; the directive must be sent now.
    Send,
    /// Another directive is outstanding. The reply sender is handed back.
    Busy(ReplyTx),
    /// The caller gave up before the command was processed.
    Abandoned,
}

/// Where an inbound payload went.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// No directive outstanding.
    Push(Bytes),
    /// Handed to the waiting query.
    Delivered,
    /// Reply to a directive whose query already went away.
    Late(Bytes),
}

struct Pending {
    reply: ReplyTx,
    deadline: Instant,
}

/// Single-slot router between inbound frames and the pending query.
///
/// Frames answer directives in the order they were sent. A directive whose
/// caller gave up stays owed a reply: the next frame goes to it (as
/// [`Route::Late`]) rather than to whichever query holds the slot now.
pub struct Demux {
    pending: Option<Pending>,
    /// Expiry of each abandoned directive still owed a reply, oldest first.
    owed: VecDeque<Instant>,
    orphan_grace: Duration,
}

impl Demux {
    /// `orphan_grace` is how long past its caller's deadline an abandoned
    /// directive's reply is still expected.
    pub fn new(orphan_grace: Duration) -> Self {
        Self { pending: None, owed: VecDeque::new(), orphan_grace }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Abandoned directives whose late reply has not arrived yet.
    pub fn owed(&self) -> usize {
        self.owed.len()
    }

    pub fn begin(&mut self, reply: ReplyTx, deadline: Instant) -> Begin {
        if reply.is_closed() {
            return Begin::Abandoned;
        }
        let now = Instant::now();
        if let Some(p) = self.pending.take() {
            if !p.reply.is_closed() && now < p.deadline {
                self.pending = Some(p);
                return Begin::Busy(reply);
            }
            tracing::debug!("releasing slot of abandoned directive");
            self.owed.push_back(p.deadline + self.orphan_grace);
            let _ = p.reply.send(Err(QueryError::Timeout));
        }
        self.pending = Some(Pending { reply, deadline });
        Begin::Send
    }

    pub fn route(&mut self, payload: Bytes) -> Route {
        let now = Instant::now();
        while self.owed.front().is_some_and(|expiry| *expiry <= now) {
            self.owed.pop_front();
        }
        if self.owed.pop_front().is_some() {
            return Route::Late(payload);
        }
        let Some(pending) = self.pending.take() else {
            return Route::Push(payload);
        };
        match pending.reply.send(Ok(payload)) {
            Ok(()) => Route::Delivered,
            Err(returned) => Route::Late(returned.unwrap_or_default()),
        }
    }

    /// Complete the pending query, if any, with `err`.
    pub fn fail(&mut self, err: QueryError) {
        self.owed.clear();
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(err));
        }
    }
}

/// Drive one agent connection from registration to teardown.
pub async fn serve_connection(state: Arc<BridgeState>, client_id: String, socket: WebSocket) {
    let (handle, cmd_rx) = ConnectionHandle::new(client_id, &state.shutdown);
    state.registry.put(Arc::clone(&handle)).await;
    tracing::info!(client_id = %handle.client_id, conn_id = %handle.conn_id, "client connected");

    let reason = read_loop(&state, &handle, socket, cmd_rx).await;

    handle.set_state(ConnState::Closed);
    let removed = state.registry.remove_conn(&handle.client_id, handle.conn_id).await;
    tracing::info!(
        client_id = %handle.client_id,
        conn_id = %handle.conn_id,
        removed,
        reason = %reason,
        "client disconnected"
    );
}

async fn read_loop(
    state: &BridgeState,
    handle: &ConnectionHandle,
    socket: WebSocket,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> String {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut demux = Demux::new(state.config.query_timeout());
    let cancel = handle.cancel_token().clone();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break "closed by server".to_owned();
            }

            cmd = cmd_rx.recv() => {
                let Some(Command::Fetch { reply, deadline }) = cmd else {
                    break "command channel closed".to_owned();
                };
                match demux.begin(reply, deadline) {
                    Begin::Send => {
                        let directive = Message::Text(FETCH_DIRECTIVE.to_owned().into());
                        if let Err(e) = ws_tx.send(directive).await {
                            demux.fail(QueryError::Transport(format!("send directive: {e}")));
                            break format!("write error: {e}");
                        }
                        tracing::debug!(client_id = %handle.client_id, "fetch directive sent");
                    }
                    Begin::Busy(reply) => {
                        let _ = reply.send(Err(QueryError::Busy));
                    }
                    Begin::Abandoned => {}
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let payload = Bytes::copy_from_slice(text.as_str().as_bytes());
                        on_payload(state, handle, &mut demux, payload).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        on_payload(state, handle, &mut demux, data).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => handle.touch(),
                    Some(Ok(Message::Close(_))) | None => break "peer closed".to_owned(),
                    Some(Err(e)) => {
                        tracing::warn!(client_id = %handle.client_id, err = %e, "read error");
                        break format!("read error: {e}");
                    }
                }
            }
        }
    };

    demux.fail(QueryError::Transport(format!("connection lost: {reason}")));
    handle.set_state(ConnState::Draining);
    reason
}

async fn on_payload(
    state: &BridgeState,
    handle: &ConnectionHandle,
    demux: &mut Demux,
    payload: Bytes,
) {
    handle.touch();
    match demux.route(payload) {
        Route::Delivered => {}
        Route::Push(payload) => {
            tracing::trace!(client_id = %handle.client_id, len = payload.len(), "push");
            state.cache.put(&handle.client_id, payload).await;
        }
        Route::Late(payload) => {
            tracing::debug!(client_id = %handle.client_id, "late reply for abandoned query");
            state.cache.put(&handle.client_id, payload).await;
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
