//! WebSocket endpoints and per-peer pumps.
//!
//! `/discover` registers comm-servers, `/connect` registers clients. Each
//! accepted socket gets a read pump (frames → central command queue) and a
//! write pump (bounded outbound queue → socket). The pumps hold no registry
//! state; they know only their alias.

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{RawQuery, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use atoll_auth::AuthRegistry;
use atoll_wire::Role;

use crate::state::{CloseReason, Command};

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<Command>,
    pub auth: Arc<AuthRegistry>,
    pub queue_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/discover", get(discover_handler))
        .route("/connect", get(connect_handler))
        .with_state(state)
}

async fn discover_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_peer(
            socket,
            Role::CommunicationServer,
            query.unwrap_or_default(),
            state,
        )
    })
}

async fn connect_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_peer(socket, Role::Client, query.unwrap_or_default(), state))
}

/// Pull `method=<name>` out of a raw query string.
fn auth_method(query: &str) -> Option<&str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("method="))
        .filter(|m| !m.is_empty())
}

async fn handle_peer(mut socket: WebSocket, role: Role, query: String, state: AppState) {
    // URL-side authentication. No method means the peer must AUTH over the
    // socket before its deadline; a named method must accept here or the
    // socket dies before registration.
    let authenticated = match auth_method(&query) {
        Some(method) => match state.auth.authenticate_url(method, role, &query) {
            Ok(true) => true,
            Ok(false) => {
                crate::metrics::auth_failure();
                info!(?role, method, "url authentication rejected");
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
            Err(e) => {
                crate::metrics::auth_failure();
                info!(?role, method, "url authentication failed: {e}");
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        },
        None => false,
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(state.queue_size);
    let (reply_tx, reply_rx) = oneshot::channel();
    if state
        .cmd_tx
        .send(Command::Register {
            role,
            authenticated,
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return; // Central task gone — we are shutting down.
    }
    let Ok(alias) = reply_rx.await else {
        return;
    };

    debug!(alias, ?role, "socket attached");
    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_pump(alias, outbound_rx, ws_tx));

    let reason = read_pump(alias, ws_rx, &state.cmd_tx).await;
    let _ = state
        .cmd_tx
        .send(Command::PeerClosed { alias, reason })
        .await;

    // The central task drops our outbound sender during teardown, which ends
    // the write pump; abort covers the case where teardown already happened.
    writer.abort();
}

/// Socket → command queue. Returns why the socket stopped.
async fn read_pump(
    alias: u64,
    mut ws_rx: SplitStream<WebSocket>,
    cmd_tx: &mpsc::Sender<Command>,
) -> CloseReason {
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(WsMessage::Binary(frame)) => {
                if cmd_tx
                    .send(Command::Frame {
                        alias,
                        frame: frame.to_vec(),
                    })
                    .await
                    .is_err()
                {
                    return CloseReason::SocketClosed;
                }
            }
            Ok(WsMessage::Close(_)) => return CloseReason::SocketClosed,
            Ok(WsMessage::Text(_)) => {
                // The protocol is binary-only.
                warn!(alias, "text frame on binary protocol");
                return CloseReason::ProtocolError;
            }
            Ok(_) => {} // Ping/Pong are handled by axum.
            Err(e) => {
                debug!(alias, "socket error: {e}");
                return CloseReason::SocketError;
            }
        }
    }
    CloseReason::SocketClosed
}

/// Bounded queue → socket. Exits when the central task drops the sender or
/// the socket rejects a write; queued frames die with the receiver.
async fn write_pump(
    alias: u64,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = ws_tx.send(WsMessage::Binary(frame)).await {
            debug!(alias, "write failed: {e}");
            break;
        }
    }
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}
