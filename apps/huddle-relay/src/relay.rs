use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{decode, ProtocolError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{BroadcastScope, RelayConfig};
use crate::registry::{ChannelHandle, ChannelId, ChannelRegistry};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("rejected message: {0}")]
    Rejected(#[from] ProtocolError),
}

/// Shared state for every relay channel.
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<ChannelRegistry>,
    scope: BroadcastScope,
    max_message_bytes: usize,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            registry: ChannelRegistry::new(),
            scope: config.scope,
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn scope(&self) -> BroadcastScope {
        self.scope
    }

    /// Validate the envelope of `text` and flood it, verbatim, to every
    /// channel in scope. Returns how many channels accepted it.
    pub fn route(&self, sender: ChannelId, text: &str) -> Result<usize, RelayError> {
        let message = decode(text)?;
        self.registry.bind_participant(sender, &message.from);
        debug!(
            channel = %sender,
            from = %message.from,
            dest = %message.dest,
            kind = message.payload.kind(),
            "relaying signaling message"
        );
        Ok(self.fan_out(sender, text))
    }

    fn fan_out(&self, sender: ChannelId, text: &str) -> usize {
        let mut delivered = 0;
        for (id, handle) in self.registry.snapshot() {
            if id == sender && self.scope == BroadcastScope::ExcludeSender {
                continue;
            }
            if handle.tx.send(text.to_string()).is_err() {
                // Writer already gone; its reader loop will deregister it.
                debug!(channel = %id, "skipping closed channel");
                continue;
            }
            delivered += 1;
        }
        delivered
    }

    fn handle_text(&self, channel: ChannelId, text: &str) {
        match self.route(channel, text) {
            Ok(delivered) => debug!(channel = %channel, delivered, "message fanned out"),
            Err(err) => warn!(channel = %channel, "dropping message: {}", err),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channels: usize,
}

pub async fn health_check(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        channels: state.registry.len(),
    })
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> Response {
    let limit = state.max_message_bytes;
    ws.max_message_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: RelayState, remote_addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let channel = state.registry.insert(ChannelHandle {
        tx,
        remote_addr: Some(remote_addr),
        participant: None,
    });
    info!(
        channel = %channel,
        remote = %remote_addr,
        open = state.registry.len(),
        "relay channel opened"
    );

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => state.handle_text(channel, &text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => state.handle_text(channel, &text),
                    Err(_) => warn!(channel = %channel, "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(channel = %channel, "websocket error: {}", err);
                    break;
                }
            },
            _ = &mut writer => {
                debug!(channel = %channel, "writer task ended");
                break;
            }
        }
    }

    let participant = state
        .registry
        .remove(channel)
        .and_then(|handle| handle.participant);
    writer.abort();
    info!(
        channel = %channel,
        participant = ?participant.as_ref().map(|p| p.as_str()),
        open = state.registry.len(),
        "relay channel closed"
    );
}
