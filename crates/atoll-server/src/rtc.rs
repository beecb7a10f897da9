//! WebRTC integration.
//!
//! The `webrtc` crate is callback-driven; every hook here does exactly one
//! thing: translate the event into a [`ServerCommand`] for the central task.
//! No registry or index state is ever touched from a callback.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::broker::{CloseReason, ServerCommand};
use crate::peer::ChannelKind;
use crate::queue::FrameQueue;

/// Build a peer connection configured with the given STUN/TURN URLs.
pub async fn build_peer_connection(
    ice_servers: &[String],
) -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: ice_servers.to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    };
    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Create the reliable/unreliable channel pair on an outbound connection.
///
/// The offerer creates both channels; the answerer receives them through
/// `on_data_channel`.
pub async fn create_channels(
    pc: &RTCPeerConnection,
) -> Result<(Arc<RTCDataChannel>, Arc<RTCDataChannel>), webrtc::Error> {
    let reliable = pc
        .create_data_channel(
            ChannelKind::Reliable.label(),
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await?;
    let unreliable = pc
        .create_data_channel(
            ChannelKind::Unreliable.label(),
            Some(RTCDataChannelInit {
                ordered: Some(false),
                max_retransmits: Some(0),
                ..Default::default()
            }),
        )
        .await?;
    Ok((reliable, unreliable))
}

/// Hook the connection-level callbacks for `alias` up to the command queue.
pub fn wire_connection(
    pc: &RTCPeerConnection,
    alias: u64,
    cmd_tx: mpsc::Sender<ServerCommand>,
) {
    let tx = cmd_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            debug!(alias, ?state, "peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                let _ = tx
                    .send(ServerCommand::PeerClosed {
                        alias,
                        reason: CloseReason::ConnectionFailed,
                    })
                    .await;
            }
        })
    }));

    let tx = cmd_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return; // Gathering complete.
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx
                        .send(ServerCommand::LocalIceCandidate {
                            alias,
                            candidate: init.candidate,
                        })
                        .await;
                }
                Err(e) => warn!(alias, "cannot serialize ICE candidate: {e}"),
            }
        })
    }));

    // Channels offered by the remote side (we answered their offer).
    let tx = cmd_tx;
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        Box::pin(async move {
            match ChannelKind::from_label(dc.label()) {
                Some(kind) => wire_channel(dc, alias, kind, tx),
                None => warn!(alias, label = dc.label(), "unexpected data channel"),
            }
        })
    }));
}

/// Hook one data channel's callbacks up to the command queue.
pub fn wire_channel(
    dc: Arc<RTCDataChannel>,
    alias: u64,
    kind: ChannelKind,
    cmd_tx: mpsc::Sender<ServerCommand>,
) {
    let tx = cmd_tx.clone();
    let dc_for_open = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        let dc = Arc::clone(&dc_for_open);
        Box::pin(async move {
            debug!(alias, label = dc.label(), "data channel open");
            let _ = tx
                .send(ServerCommand::ChannelOpen {
                    alias,
                    kind,
                    channel: dc,
                })
                .await;
        })
    }));

    let tx = cmd_tx.clone();
    dc.on_message(Box::new(move |msg| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx
                .send(ServerCommand::PeerFrame {
                    alias,
                    kind,
                    frame: msg.data.to_vec(),
                })
                .await;
        })
    }));

    let tx = cmd_tx;
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx
                .send(ServerCommand::PeerClosed {
                    alias,
                    reason: CloseReason::ChannelClosed,
                })
                .await;
        })
    }));
}

/// Drain a peer's outbound queue into its data channel.
///
/// One pump per (peer, channel). Ends when the queue closes (teardown) or a
/// write fails (the channel died under us).
pub fn spawn_write_pump(
    alias: u64,
    kind: ChannelKind,
    dc: Arc<RTCDataChannel>,
    queue: Arc<FrameQueue>,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = queue.pop().await {
            if let Err(e) = dc.send(&frame).await {
                debug!(alias, ?kind, "data channel write failed: {e}");
                let _ = cmd_tx
                    .send(ServerCommand::PeerClosed {
                        alias,
                        reason: CloseReason::TransportError,
                    })
                    .await;
                break;
            }
        }
    })
}

/// Create and install a local offer, returning its SDP.
pub async fn create_offer(pc: &RTCPeerConnection) -> Result<String, webrtc::Error> {
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;
    Ok(offer.sdp)
}

/// Apply a remote offer and produce our answer SDP.
pub async fn accept_offer(pc: &RTCPeerConnection, sdp: String) -> Result<String, webrtc::Error> {
    pc.set_remote_description(RTCSessionDescription::offer(sdp)?)
        .await?;
    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer.clone()).await?;
    Ok(answer.sdp)
}

/// Apply the remote answer to an offer we made.
pub async fn accept_answer(pc: &RTCPeerConnection, sdp: String) -> Result<(), webrtc::Error> {
    pc.set_remote_description(RTCSessionDescription::answer(sdp)?)
        .await
}

/// Add a trickled remote ICE candidate.
pub async fn add_remote_candidate(
    pc: &RTCPeerConnection,
    candidate: String,
) -> Result<(), webrtc::Error> {
    pc.add_ice_candidate(RTCIceCandidateInit {
        candidate,
        ..Default::default()
    })
    .await
}
