//! Coordinator — the rendezvous and signaling hub of an atoll deployment.
//!
//! Comm-servers register on `/discover`, clients on `/connect`. The
//! coordinator assigns each peer a monotonically increasing alias,
//! authenticates it, tells it which servers to dial, and relays SDP/ICE
//! frames between peers until their WebRTC connections stand on their own.
//!
//! All registry state lives on one central task fed by a command queue;
//! WebSocket read and write pumps never touch it directly.

pub mod config;
pub mod metrics;
pub mod selector;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use atoll_auth::AuthRegistry;

use crate::config::CoordinatorConfig;
use crate::selector::ServerSelector;
use crate::state::{central_task, Command};

/// A running coordinator: the bound address plus task handles.
pub struct CoordinatorHandle {
    pub local_addr: SocketAddr,
    pub serve_task: JoinHandle<std::io::Result<()>>,
    pub central_task: JoinHandle<()>,
}

/// Bind the listener, spawn the central task, and start serving.
///
/// Binding happens before anything else so port conflicts fail fast with
/// exit-code-1 semantics at the binary level.
pub async fn start(
    config: CoordinatorConfig,
    auth: Arc<AuthRegistry>,
    selector: Box<dyn ServerSelector>,
) -> std::io::Result<CoordinatorHandle> {
    let listener = TcpListener::bind(&config.bind).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "coordinator listening");

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(1024);
    let central = tokio::spawn(central_task(
        config.clone(),
        Arc::clone(&auth),
        selector,
        cmd_rx,
    ));

    let app = ws::router(ws::AppState {
        cmd_tx,
        auth,
        queue_size: config.queue_size,
    });
    let serve = tokio::spawn(async move { axum::serve(listener, app).await });

    Ok(CoordinatorHandle {
        local_addr,
        serve_task: serve,
        central_task: central,
    })
}
