//! The comm-server's link to the coordinator.
//!
//! One WebSocket, two pumps: the read pump turns coordinator frames into
//! broker commands, the write pump drains a bounded queue of signaling
//! frames. A dead coordinator socket is fatal to the broker — peers keep
//! their WebRTC connections, but no new peer could ever reach us.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use atoll_auth::AuthRegistry;
use atoll_wire::Role;

use crate::broker::ServerCommand;
use crate::config::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("auth method {0:?} is not registered")]
    UnknownAuthMethod(String),
    #[error(transparent)]
    Auth(#[from] atoll_auth::AuthError),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Dial the coordinator's `/discover` endpoint and spawn both pumps.
///
/// Returns the sender for outbound signaling frames. Dial failures bubble up
/// so boot can exit with status 1.
pub async fn connect(
    config: &ServerConfig,
    auth: &AuthRegistry,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<mpsc::Sender<Bytes>, LinkError> {
    let authenticator = auth
        .get(&config.auth_method)
        .ok_or_else(|| LinkError::UnknownAuthMethod(config.auth_method.clone()))?;
    let url =
        authenticator.generate_auth_url(&config.discover_url(), Role::CommunicationServer)?;

    let (socket, _) = connect_async(url.as_str()).await?;
    info!(endpoint = %config.discover_url(), "connected to coordinator");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(256);
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(WsMessage::Binary(frame)).await {
                warn!("coordinator write failed: {e}");
                break;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    tokio::spawn(async move {
        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(WsMessage::Binary(frame)) => {
                    if cmd_tx
                        .send(ServerCommand::CoordinatorFrame(frame.to_vec()))
                        .await
                        .is_err()
                    {
                        return; // Broker already gone.
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {} // Ping/Pong handled by tungstenite.
                Err(e) => {
                    debug!("coordinator read failed: {e}");
                    break;
                }
            }
        }
        let _ = cmd_tx.send(ServerCommand::CoordinatorClosed).await;
    });

    Ok(outbound_tx)
}
