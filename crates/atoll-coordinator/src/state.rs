//! Central registry task.
//!
//! The registry, alias counter, and server selector are owned by exactly one
//! task. Read pumps translate inbound WebSocket frames into [`Command`]s;
//! write pumps drain the bounded per-peer queues this task feeds. Nothing
//! here blocks on network I/O — enqueueing is `try_send` and overflow is a
//! disconnect, not a wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use atoll_auth::AuthRegistry;
use atoll_wire::{
    decode, encode, patch_from_alias, peek_type, Message, MessageType, RelayHeader, Role,
};

use crate::config::CoordinatorConfig;
use crate::metrics;
use crate::selector::ServerSelector;

/// Why a peer left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SocketClosed,
    SocketError,
    ProtocolError,
    AuthFailed,
    AuthTimeout,
    QueueOverflow,
}

/// Commands processed by the central task.
#[derive(Debug)]
pub enum Command {
    /// A WebSocket finished its upgrade; allocate an alias and track it.
    Register {
        role: Role,
        /// True when URL-side authentication already succeeded.
        authenticated: bool,
        outbound: mpsc::Sender<Bytes>,
        reply: oneshot::Sender<u64>,
    },
    /// One binary frame arrived from the peer.
    Frame { alias: u64, frame: Vec<u8> },
    /// The peer's socket is gone (read pump exited).
    PeerClosed { alias: u64, reason: CloseReason },
}

struct Peer {
    role: Role,
    outbound: mpsc::Sender<Bytes>,
    is_authenticated: bool,
    /// WELCOME sent — also the point a server enters the selector.
    welcomed: bool,
    auth_deadline: Instant,
}

struct Registry {
    peers: HashMap<u64, Peer>,
    next_alias: u64,
    selector: Box<dyn ServerSelector>,
    auth: Arc<AuthRegistry>,
    auth_timeout: Duration,
}

/// Run the central task until the command channel closes.
pub async fn central_task(
    config: CoordinatorConfig,
    auth: Arc<AuthRegistry>,
    selector: Box<dyn ServerSelector>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let mut registry = Registry {
        peers: HashMap::new(),
        next_alias: 1,
        selector,
        auth,
        auth_timeout: config.auth_timeout,
    };

    let mut sweep = tokio::time::interval(Duration::from_secs(1));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => registry.handle(cmd),
                None => break,
            },
            _ = sweep.tick() => registry.sweep_auth_deadlines(),
        }
    }
}

impl Registry {
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                role,
                authenticated,
                outbound,
                reply,
            } => {
                let alias = self.next_alias;
                self.next_alias += 1;
                self.peers.insert(
                    alias,
                    Peer {
                        role,
                        outbound,
                        is_authenticated: authenticated,
                        welcomed: false,
                        auth_deadline: Instant::now() + self.auth_timeout,
                    },
                );
                debug!(alias, ?role, authenticated, "peer registered");
                self.update_gauges();
                let _ = reply.send(alias);
                if authenticated {
                    self.welcome(alias);
                }
            }
            Command::Frame { alias, frame } => self.handle_frame(alias, frame),
            Command::PeerClosed { alias, reason } => self.close(alias, reason),
        }
    }

    /// Send the WELCOME and, for comm-servers, enter the selector.
    ///
    /// The selector is queried before `server_registered` runs, so a new
    /// server's list holds only the servers registered before it — that list
    /// is what it dials to join the mesh.
    fn welcome(&mut self, alias: u64) {
        let Some(peer) = self.peers.get(&alias) else {
            return;
        };
        if peer.welcomed {
            return;
        }
        let role = peer.role;
        let available_servers = match role {
            Role::Client => self.selector.server_alias_list(alias),
            Role::CommunicationServer => {
                let list = self.selector.server_alias_list(alias);
                self.selector.server_registered(alias);
                list
            }
            Role::Unknown => Vec::new(),
        };
        info!(alias, ?role, servers = available_servers.len(), "welcoming peer");
        let frame = encode(&Message::Welcome {
            alias,
            available_servers,
        });
        if let Some(peer) = self.peers.get_mut(&alias) {
            peer.welcomed = true;
        }
        self.enqueue(alias, frame);
    }

    fn handle_frame(&mut self, alias: u64, mut frame: Vec<u8>) {
        let is_authenticated = match self.peers.get(&alias) {
            Some(peer) => peer.is_authenticated,
            None => return, // Raced with teardown.
        };

        let msg_type = match peek_type(&frame) {
            Ok(t) => t,
            Err(e) => {
                debug!(alias, "undecodable frame: {e}");
                self.close(alias, CloseReason::ProtocolError);
                return;
            }
        };

        if !is_authenticated {
            if msg_type != MessageType::Auth {
                debug!(alias, ?msg_type, "frame before authentication");
                self.close(alias, CloseReason::ProtocolError);
                return;
            }
            self.handle_auth(alias, &frame);
            return;
        }

        match msg_type {
            MessageType::Connect
            | MessageType::WebRtcOffer
            | MessageType::WebRtcAnswer
            | MessageType::WebRtcIceCandidate => {
                let header = match RelayHeader::parse(&frame) {
                    Ok(h) => h,
                    Err(e) => {
                        debug!(alias, "malformed relay frame: {e}");
                        self.close(alias, CloseReason::ProtocolError);
                        return;
                    }
                };
                // The sender's alias is authoritative; whatever the peer put
                // in from_alias is overwritten before the relay.
                if patch_from_alias(&mut frame, alias).is_err() {
                    self.close(alias, CloseReason::ProtocolError);
                    return;
                }
                if self.peers.contains_key(&header.to_alias) {
                    metrics::frame_relayed();
                    self.enqueue(header.to_alias, Bytes::from(frame));
                } else {
                    // Unknown targets are dropped without telling the sender.
                    metrics::relay_dropped();
                    debug!(alias, to = header.to_alias, ?msg_type, "relay target unknown");
                }
            }
            MessageType::Auth => {
                // Already authenticated; nothing to do.
                debug!(alias, "duplicate AUTH ignored");
            }
            other => {
                warn!(alias, ?other, "unexpected message type, dropping");
            }
        }
    }

    fn handle_auth(&mut self, alias: u64, frame: &[u8]) {
        let Some(peer) = self.peers.get(&alias) else {
            return;
        };
        let role = peer.role;
        let accepted = match decode(frame) {
            Ok(Message::Auth { method, body, .. }) => {
                match self.auth.authenticate_message(&method, role, &body) {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        info!(alias, "authentication error: {e}");
                        false
                    }
                }
            }
            Ok(_) | Err(_) => false,
        };

        if !accepted {
            self.close(alias, CloseReason::AuthFailed);
            return;
        }

        if let Some(peer) = self.peers.get_mut(&alias) {
            peer.is_authenticated = true;
        }
        self.welcome(alias);
    }

    /// Push a frame onto a peer's bounded outbound queue.
    ///
    /// A full queue means the peer cannot keep up; it is disconnected rather
    /// than awaited (the central task must never park on a slow socket).
    fn enqueue(&mut self, alias: u64, frame: Bytes) {
        let Some(peer) = self.peers.get(&alias) else {
            return;
        };
        match peer.outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::queue_overflow();
                warn!(alias, "outbound queue full, disconnecting peer");
                self.close(alias, CloseReason::QueueOverflow);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Write pump already gone; the read pump's PeerClosed will
                // finish the teardown.
            }
        }
    }

    fn close(&mut self, alias: u64, reason: CloseReason) {
        let Some(peer) = self.peers.remove(&alias) else {
            return;
        };
        match reason {
            CloseReason::AuthFailed | CloseReason::AuthTimeout => {
                metrics::auth_failure();
                info!(alias, ?reason, "peer closed");
            }
            _ => info!(alias, ?reason, "peer closed"),
        }
        if peer.role == Role::CommunicationServer && peer.welcomed {
            self.selector.server_unregistered(alias);
        }
        // Dropping the sender wakes the write pump, which closes the socket
        // and discards anything still queued.
        drop(peer);
        self.update_gauges();
    }

    fn sweep_auth_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .peers
            .iter()
            .filter(|(_, p)| !p.is_authenticated && now >= p.auth_deadline)
            .map(|(alias, _)| *alias)
            .collect();
        for alias in expired {
            self.close(alias, CloseReason::AuthTimeout);
        }
    }

    fn update_gauges(&self) {
        for role in [Role::Client, Role::CommunicationServer] {
            let count = self.peers.values().filter(|p| p.role == role).count();
            metrics::peers_connected(role, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use atoll_auth::AllowAllAuthenticator;
    use atoll_wire::TopicEncoding;

    use crate::selector::RegistrationOrderSelector;

    struct Harness {
        cmd_tx: mpsc::Sender<Command>,
    }

    impl Harness {
        fn spawn(auth_timeout: Duration) -> Self {
            let mut auth = AuthRegistry::new();
            auth.add_or_update("allow-all", Arc::new(AllowAllAuthenticator::new("allow-all")));
            let config = CoordinatorConfig {
                auth_timeout,
                ..CoordinatorConfig::default()
            };
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            tokio::spawn(central_task(
                config,
                Arc::new(auth),
                Box::new(RegistrationOrderSelector::new()),
                cmd_rx,
            ));
            Harness { cmd_tx }
        }

        async fn register(
            &self,
            role: Role,
            authenticated: bool,
        ) -> (u64, mpsc::Receiver<Bytes>) {
            let (outbound_tx, outbound_rx) = mpsc::channel(16);
            let (reply_tx, reply_rx) = oneshot::channel();
            self.cmd_tx
                .send(Command::Register {
                    role,
                    authenticated,
                    outbound: outbound_tx,
                    reply: reply_tx,
                })
                .await
                .unwrap();
            (reply_rx.await.unwrap(), outbound_rx)
        }

        async fn frame(&self, alias: u64, msg: &Message) {
            self.cmd_tx
                .send(Command::Frame {
                    alias,
                    frame: encode(msg).to_vec(),
                })
                .await
                .unwrap();
        }
    }

    async fn expect_welcome(rx: &mut mpsc::Receiver<Bytes>) -> (u64, Vec<u64>) {
        let frame = rx.recv().await.expect("welcome frame");
        match decode(&frame).unwrap() {
            Message::Welcome {
                alias,
                available_servers,
            } => (alias, available_servers),
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aliases_are_unique_and_monotonic() {
        let h = Harness::spawn(Duration::from_secs(60));
        let mut last = 0;
        for _ in 0..5 {
            let (alias, _rx) = h.register(Role::Client, true).await;
            assert!(alias > last, "{alias} must exceed {last}");
            last = alias;
        }
    }

    #[tokio::test]
    async fn first_server_welcomed_with_empty_list() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (alias, mut rx) = h.register(Role::CommunicationServer, true).await;
        let (welcome_alias, servers) = expect_welcome(&mut rx).await;
        assert_eq!(welcome_alias, alias);
        assert!(servers.is_empty());
    }

    #[tokio::test]
    async fn second_server_sees_first_and_client_sees_both() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (s1, mut rx1) = h.register(Role::CommunicationServer, true).await;
        let (_, servers) = expect_welcome(&mut rx1).await;
        assert!(servers.is_empty());

        let (s2, mut rx2) = h.register(Role::CommunicationServer, true).await;
        let (_, servers) = expect_welcome(&mut rx2).await;
        assert_eq!(servers, vec![s1]);

        let (_c, mut rx3) = h.register(Role::Client, true).await;
        let (_, servers) = expect_welcome(&mut rx3).await;
        assert_eq!(servers, vec![s1, s2]);
    }

    #[tokio::test]
    async fn relay_rewrites_from_alias() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (server, mut server_rx) = h.register(Role::CommunicationServer, true).await;
        let _ = expect_welcome(&mut server_rx).await;
        let (client, mut client_rx) = h.register(Role::Client, true).await;
        let _ = expect_welcome(&mut client_rx).await;

        // The sender lies about its own alias; the coordinator rewrites it.
        h.frame(
            client,
            &Message::WebRtcOffer {
                from_alias: 9999,
                to_alias: server,
                sdp: "v=0".into(),
            },
        )
        .await;

        let relayed = server_rx.recv().await.unwrap();
        match decode(&relayed).unwrap() {
            Message::WebRtcOffer {
                from_alias,
                to_alias,
                sdp,
            } => {
                assert_eq!(from_alias, client);
                assert_eq!(to_alias, server);
                assert_eq!(sdp, "v=0");
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_relay_target_dropped_silently() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (client, mut client_rx) = h.register(Role::Client, true).await;
        let _ = expect_welcome(&mut client_rx).await;

        h.frame(
            client,
            &Message::Connect {
                from_alias: client,
                to_alias: 424242,
            },
        )
        .await;

        // The peer stays registered: a later self-addressed frame still
        // arrives, proving the drop didn't kill the connection.
        h.frame(
            client,
            &Message::WebRtcIceCandidate {
                from_alias: client,
                to_alias: client,
                candidate: "candidate:0".into(),
            },
        )
        .await;
        let frame = client_rx.recv().await.unwrap();
        assert!(matches!(
            decode(&frame).unwrap(),
            Message::WebRtcIceCandidate { .. }
        ));
    }

    #[tokio::test]
    async fn auth_message_promotes_and_welcomes() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (alias, mut rx) = h.register(Role::Client, false).await;
        // No welcome yet.
        assert!(rx.try_recv().is_err());

        h.frame(
            alias,
            &Message::Auth {
                role: Role::Client,
                method: "allow-all".into(),
                body: Bytes::new(),
            },
        )
        .await;
        let (welcome_alias, _) = expect_welcome(&mut rx).await;
        assert_eq!(welcome_alias, alias);
    }

    #[tokio::test]
    async fn unknown_auth_method_closes_peer() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (alias, mut rx) = h.register(Role::Client, false).await;
        h.frame(
            alias,
            &Message::Auth {
                role: Role::Client,
                method: "no-such-method".into(),
                body: Bytes::new(),
            },
        )
        .await;
        // Queue sender dropped on close.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_auth_frame_before_auth_closes_peer() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (alias, mut rx) = h.register(Role::Client, false).await;
        h.frame(
            alias,
            &Message::TopicSubscription {
                format: TopicEncoding::Plain,
                topics: Bytes::from_static(b"profile"),
            },
        )
        .await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_timeout_drops_peer() {
        let h = Harness::spawn(Duration::from_millis(100));
        let (_alias, mut rx) = h.register(Role::Client, false).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unregistered_server_leaves_selector() {
        let h = Harness::spawn(Duration::from_secs(60));
        let (s1, mut rx1) = h.register(Role::CommunicationServer, true).await;
        let _ = expect_welcome(&mut rx1).await;
        h.cmd_tx
            .send(Command::PeerClosed {
                alias: s1,
                reason: CloseReason::SocketClosed,
            })
            .await
            .unwrap();

        let (_c, mut rx) = h.register(Role::Client, true).await;
        let (_, servers) = expect_welcome(&mut rx).await;
        assert!(servers.is_empty());
    }
}
