//! The broker's central task.
//!
//! Owns the peer registry and the subscription index. Everything else —
//! coordinator pumps, WebRTC callbacks, channel write pumps — talks to it
//! through [`ServerCommand`]s, so no lock ever guards broker state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use atoll_auth::AuthRegistry;
use atoll_wire::{
    decode, encode, patch_from_alias, peek_type, Message, MessageType, Role, TopicEncoding,
    TopicHeader,
};
use webrtc::data_channel::RTCDataChannel;

use crate::config::ServerConfig;
use crate::metrics;
use crate::peer::{ChannelKind, Peer, PeerState};
use crate::queue::{PushError, Pushed};
use crate::report::{BrokerSnapshot, PeerReport, Reporter};
use crate::rtc;
use crate::topics::SubscriptionIndex;

/// Why a peer was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TransportError,
    ProtocolError,
    AuthFailed,
    AuthTimeout,
    QueueOverflow,
    ConnectionFailed,
    ChannelClosed,
}

/// Commands processed by the central task.
pub enum ServerCommand {
    /// One binary frame from the coordinator socket.
    CoordinatorFrame(Vec<u8>),
    /// The coordinator socket died; the broker cannot continue.
    CoordinatorClosed,
    /// A data channel reached the open state.
    ChannelOpen {
        alias: u64,
        kind: ChannelKind,
        channel: Arc<RTCDataChannel>,
    },
    /// One frame from a peer's data channel.
    PeerFrame {
        alias: u64,
        kind: ChannelKind,
        frame: Vec<u8>,
    },
    /// A locally gathered ICE candidate to trickle out via the coordinator.
    LocalIceCandidate { alias: u64, candidate: String },
    /// A peer is gone (callback or pump noticed first).
    PeerClosed { alias: u64, reason: CloseReason },
}

impl std::fmt::Debug for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoordinatorFrame(frame) => {
                write!(f, "CoordinatorFrame({} bytes)", frame.len())
            }
            Self::CoordinatorClosed => write!(f, "CoordinatorClosed"),
            Self::ChannelOpen { alias, kind, .. } => {
                write!(f, "ChannelOpen {{ alias: {alias}, kind: {kind:?} }}")
            }
            Self::PeerFrame { alias, kind, frame } => write!(
                f,
                "PeerFrame {{ alias: {alias}, kind: {kind:?}, len: {} }}",
                frame.len()
            ),
            Self::LocalIceCandidate { alias, .. } => {
                write!(f, "LocalIceCandidate {{ alias: {alias} }}")
            }
            Self::PeerClosed { alias, reason } => {
                write!(f, "PeerClosed {{ alias: {alias}, reason: {reason:?} }}")
            }
        }
    }
}

pub struct BrokerState {
    /// Our own alias; 0 until the coordinator's WELCOME.
    pub alias: u64,
    peers: HashMap<u64, Peer>,
    index: SubscriptionIndex,
    /// Server aliases we dialed via CONNECT and expect an offer from.
    pending_server_dials: HashSet<u64>,
    /// The interest set last mirrored to mesh neighbors.
    advertised_topics: HashSet<String>,
    coordinator_tx: mpsc::Sender<Bytes>,
    auth: Arc<AuthRegistry>,
    config: ServerConfig,
    reporter: Box<dyn Reporter>,
    /// Handed to WebRTC callbacks and write pumps spawned by this task.
    cmd_tx: mpsc::Sender<ServerCommand>,
}

/// Run the central task until the command channel or the coordinator closes.
pub async fn run(mut state: BrokerState, mut cmd_rx: mpsc::Receiver<ServerCommand>) {
    let mut report = tokio::time::interval(state.config.report_period);
    report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sweep = tokio::time::interval(Duration::from_secs(1));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ServerCommand::CoordinatorClosed) => {
                    error!("coordinator connection lost, shutting down");
                    break;
                }
                Some(cmd) => state.handle(cmd).await,
                None => break,
            },
            _ = report.tick() => state.report(),
            _ = sweep.tick() => state.sweep_auth_deadlines(),
        }
    }
}

impl BrokerState {
    pub fn new(
        config: ServerConfig,
        auth: Arc<AuthRegistry>,
        reporter: Box<dyn Reporter>,
        coordinator_tx: mpsc::Sender<Bytes>,
        cmd_tx: mpsc::Sender<ServerCommand>,
    ) -> Self {
        Self {
            alias: 0,
            peers: HashMap::new(),
            index: SubscriptionIndex::new(),
            pending_server_dials: HashSet::new(),
            advertised_topics: HashSet::new(),
            coordinator_tx,
            auth,
            config,
            reporter,
            cmd_tx,
        }
    }

    pub async fn handle(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::CoordinatorFrame(frame) => self.handle_coordinator_frame(frame).await,
            ServerCommand::CoordinatorClosed => unreachable!("handled by the run loop"),
            ServerCommand::ChannelOpen {
                alias,
                kind,
                channel,
            } => self.handle_channel_open(alias, kind, channel),
            ServerCommand::PeerFrame { alias, kind, frame } => {
                self.handle_peer_frame(alias, kind, frame)
            }
            ServerCommand::LocalIceCandidate { alias, candidate } => {
                let from_alias = self.alias;
                self.send_signal(&Message::WebRtcIceCandidate {
                    from_alias,
                    to_alias: alias,
                    candidate,
                });
            }
            ServerCommand::PeerClosed { alias, reason } => self.close_peer(alias, reason),
        }
    }

    // ── Coordinator protocol ────────────────────────────────────────────

    async fn handle_coordinator_frame(&mut self, frame: Vec<u8>) {
        let msg = match decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("undecodable coordinator frame: {e}");
                return;
            }
        };
        match msg {
            Message::Welcome {
                alias,
                available_servers,
            } => {
                info!(alias, servers = available_servers.len(), "registered with coordinator");
                self.alias = alias;
                // Dial every server registered before us; they will offer.
                for server in available_servers {
                    self.pending_server_dials.insert(server);
                    self.send_signal(&Message::Connect {
                        from_alias: alias,
                        to_alias: server,
                    });
                }
            }
            Message::Connect { from_alias, .. } => {
                self.initiate_connection(from_alias).await;
            }
            Message::WebRtcOffer {
                from_alias, sdp, ..
            } => {
                self.accept_offer(from_alias, sdp).await;
            }
            Message::WebRtcAnswer {
                from_alias, sdp, ..
            } => {
                let Some(pc) = self.peers.get(&from_alias).and_then(|p| p.conn.clone()) else {
                    debug!(from_alias, "answer for unknown peer");
                    return;
                };
                if let Err(e) = rtc::accept_answer(&pc, sdp).await {
                    warn!(from_alias, "cannot apply answer: {e}");
                    self.close_peer(from_alias, CloseReason::TransportError);
                }
            }
            Message::WebRtcIceCandidate {
                from_alias,
                candidate,
                ..
            } => {
                let Some(pc) = self.peers.get(&from_alias).and_then(|p| p.conn.clone()) else {
                    debug!(from_alias, "candidate for unknown peer");
                    return;
                };
                if let Err(e) = rtc::add_remote_candidate(&pc, candidate).await {
                    debug!(from_alias, "cannot add remote candidate: {e}");
                }
            }
            other => {
                warn!(msg_type = ?other.message_type(), "unexpected coordinator message");
            }
        }
    }

    /// A peer (relayed via the coordinator) asked us to open a connection to
    /// it: build the peer connection, create both channels, send the offer.
    async fn initiate_connection(&mut self, remote: u64) {
        if self.peers.contains_key(&remote) {
            debug!(remote, "duplicate CONNECT ignored");
            return;
        }
        let pc = match rtc::build_peer_connection(&self.config.ice_servers).await {
            Ok(pc) => pc,
            Err(e) => {
                warn!(remote, "cannot build peer connection: {e}");
                return;
            }
        };
        rtc::wire_connection(&pc, remote, self.cmd_tx.clone());
        let (reliable, unreliable) = match rtc::create_channels(&pc).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(remote, "cannot create data channels: {e}");
                return;
            }
        };
        rtc::wire_channel(reliable, remote, ChannelKind::Reliable, self.cmd_tx.clone());
        rtc::wire_channel(
            unreliable,
            remote,
            ChannelKind::Unreliable,
            self.cmd_tx.clone(),
        );

        let sdp = match rtc::create_offer(&pc).await {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(remote, "cannot create offer: {e}");
                return;
            }
        };

        let peer = self.add_peer(remote, Role::Unknown);
        peer.conn = Some(pc);
        let from_alias = self.alias;
        self.send_signal(&Message::WebRtcOffer {
            from_alias,
            to_alias: remote,
            sdp,
        });
    }

    /// An offer arrived — either from a server we dialed with CONNECT, or
    /// (never in the current protocol, but harmless) from someone else the
    /// coordinator let through. Dialed servers are recorded so their role is
    /// known before AUTH.
    async fn accept_offer(&mut self, remote: u64, sdp: String) {
        if self.peers.contains_key(&remote) {
            debug!(remote, "duplicate offer ignored");
            return;
        }
        let role = if self.pending_server_dials.remove(&remote) {
            Role::CommunicationServer
        } else {
            Role::Unknown
        };
        let pc = match rtc::build_peer_connection(&self.config.ice_servers).await {
            Ok(pc) => pc,
            Err(e) => {
                warn!(remote, "cannot build peer connection: {e}");
                return;
            }
        };
        rtc::wire_connection(&pc, remote, self.cmd_tx.clone());
        let answer = match rtc::accept_offer(&pc, sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(remote, "cannot answer offer: {e}");
                return;
            }
        };

        let peer = self.add_peer(remote, role);
        peer.conn = Some(pc);
        let from_alias = self.alias;
        self.send_signal(&Message::WebRtcAnswer {
            from_alias,
            to_alias: remote,
            sdp: answer,
        });
    }

    // ── Peer lifecycle ──────────────────────────────────────────────────

    /// Insert a fresh peer record. Public so the integration tests can stand
    /// up peers without a WebRTC stack.
    pub fn add_peer(&mut self, alias: u64, role: Role) -> &mut Peer {
        let peer = Peer::new(
            alias,
            role,
            self.config.reliable_queue_size,
            self.config.unreliable_queue_size,
            Instant::now() + self.config.auth_timeout,
        );
        let count = self.peers.len() + usize::from(!self.peers.contains_key(&alias));
        metrics::peers_connected(count);
        self.peers.entry(alias).or_insert(peer)
    }

    fn handle_channel_open(&mut self, alias: u64, kind: ChannelKind, channel: Arc<RTCDataChannel>) {
        let Some(peer) = self.peers.get_mut(&alias) else {
            debug!(alias, "channel open for unknown peer");
            return;
        };
        peer.channel_opened(kind);
        // The authentication clock runs from channel-open, not connection
        // creation: give the peer the full window to present credentials.
        peer.auth_deadline = Instant::now() + self.config.auth_timeout;
        rtc::spawn_write_pump(
            alias,
            kind,
            channel,
            Arc::clone(peer.queue(kind)),
            self.cmd_tx.clone(),
        );

        // On a server↔server link the dialing side speaks first: push our
        // own AUTH as soon as the reliable channel opens.
        if kind == ChannelKind::Reliable
            && peer.role == Role::CommunicationServer
            && !peer.auth_sent
        {
            self.send_own_auth(alias);
        }
    }

    fn send_own_auth(&mut self, alias: u64) {
        let method = self.config.auth_method.clone();
        let Some(authenticator) = self.auth.get(&method) else {
            // Startup validates the method; reaching here is a wiring bug.
            error!(%method, "configured auth method missing from registry");
            return;
        };
        let auth_data = match authenticator.generate_auth_message(Role::CommunicationServer) {
            Ok(data) => data,
            Err(e) => {
                error!(%method, "cannot generate auth message: {e}");
                return;
            }
        };
        let frame = encode(&Message::Auth {
            role: Role::CommunicationServer,
            method: auth_data.method,
            body: auth_data.body,
        });
        let Some(peer) = self.peers.get_mut(&alias) else {
            return;
        };
        peer.auth_sent = true;
        if peer.reliable.push(frame).is_err() {
            self.close_peer(alias, CloseReason::QueueOverflow);
        }
    }

    // ── Data-channel frames ─────────────────────────────────────────────

    fn handle_peer_frame(&mut self, alias: u64, kind: ChannelKind, frame: Vec<u8>) {
        let Some(peer) = self.peers.get(&alias) else {
            return; // Raced with teardown.
        };

        if !peer.is_authenticated {
            match kind {
                ChannelKind::Reliable => {
                    // The first reliable frame must be AUTH; anything else
                    // kills the connection.
                    if matches!(peek_type(&frame), Ok(MessageType::Auth)) {
                        self.handle_peer_auth(alias, &frame);
                    } else {
                        debug!(alias, "non-AUTH frame before authentication");
                        self.close_peer(alias, CloseReason::ProtocolError);
                    }
                }
                // Unreliable frames from strangers are dropped, not punished:
                // they may simply have raced the AUTH in flight.
                ChannelKind::Unreliable => {}
            }
            return;
        }

        match peek_type(&frame) {
            Ok(MessageType::Topic) => self.fanout(alias, kind, frame),
            Ok(MessageType::TopicSubscription) => self.apply_subscription(alias, &frame),
            Ok(MessageType::Auth) => debug!(alias, "duplicate AUTH ignored"),
            Ok(other) => debug!(alias, ?other, "unexpected frame type, dropping"),
            Err(e) => {
                debug!(alias, "undecodable frame: {e}");
                self.close_peer(alias, CloseReason::ProtocolError);
            }
        }
    }

    fn handle_peer_auth(&mut self, alias: u64, frame: &[u8]) {
        let declared_role;
        let accepted = match decode(frame) {
            Ok(Message::Auth { role, method, body }) => {
                declared_role = role;
                match self.auth.authenticate_message(&method, role, &body) {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        info!(alias, "authentication error: {e}");
                        false
                    }
                }
            }
            _ => {
                self.close_peer(alias, CloseReason::ProtocolError);
                return;
            }
        };
        if !accepted {
            metrics::auth_failure();
            info!(alias, "authentication rejected");
            self.close_peer(alias, CloseReason::AuthFailed);
            return;
        }

        let Some(peer) = self.peers.get_mut(&alias) else {
            return;
        };
        if peer.role == Role::Unknown {
            peer.role = declared_role;
        } else if peer.role != declared_role {
            warn!(alias, known = ?peer.role, declared = ?declared_role, "role mismatch in AUTH");
            self.close_peer(alias, CloseReason::ProtocolError);
            return;
        }
        peer.promote();
        info!(alias, role = ?declared_role, "peer authenticated");

        // Answer a fellow server's AUTH with ours so both ends finish
        // mutually authenticated, then tell it what our clients are
        // subscribed to. The reliable channel keeps the AUTH ahead of the
        // interest frame, so the remote processes it authenticated.
        if declared_role == Role::CommunicationServer {
            let needs_reply = self
                .peers
                .get(&alias)
                .map(|p| !p.auth_sent)
                .unwrap_or(false);
            if needs_reply {
                self.send_own_auth(alias);
            }
            self.advertise_to(alias);
        }
    }

    fn apply_subscription(&mut self, alias: u64, frame: &[u8]) {
        let topics = match decode(frame) {
            Ok(Message::TopicSubscription { format, topics }) => {
                match atoll_wire::decode_topic_set(&topics, format) {
                    Ok(set) => set,
                    Err(e) => {
                        debug!(alias, "bad subscription payload: {e}");
                        self.close_peer(alias, CloseReason::ProtocolError);
                        return;
                    }
                }
            }
            _ => {
                self.close_peer(alias, CloseReason::ProtocolError);
                return;
            }
        };

        let Some(peer) = self.peers.get_mut(&alias) else {
            return;
        };
        debug!(alias, topics = topics.len(), "subscription replaced");
        self.index.replace(alias, &peer.topics, &topics);
        peer.topics = topics;
        metrics::topics_active(self.index.topic_count());
        self.advertise_subscriptions();
    }

    // ── Mesh interest propagation ───────────────────────────────────────

    /// Mirror the union of local client interest to every mesh neighbor.
    ///
    /// A neighbor only fans frames toward us when our alias sits in its
    /// index, so any change to the union must be re-advertised. Neighbor
    /// interest itself is excluded from the union: mirroring it back would
    /// bounce remote subscriptions across the single-hop mesh.
    fn advertise_subscriptions(&mut self) {
        let interest: HashSet<String> = self
            .peers
            .values()
            .filter(|p| p.role != Role::CommunicationServer)
            .flat_map(|p| p.topics.iter().cloned())
            .collect();
        if interest == self.advertised_topics {
            return;
        }
        let Some(frame) = Self::encode_interest(&interest) else {
            return;
        };

        let mut overflowed = Vec::new();
        for peer in self.peers.values() {
            if peer.role != Role::CommunicationServer || !peer.is_authenticated {
                continue;
            }
            if matches!(peer.reliable.push(frame.clone()), Err(PushError::Overflow)) {
                overflowed.push(peer.alias);
            }
        }
        debug!(topics = interest.len(), "mesh interest advertised");
        self.advertised_topics = interest;
        for alias in overflowed {
            metrics::reliable_overflow();
            self.close_peer(alias, CloseReason::QueueOverflow);
        }
    }

    /// Send the currently advertised interest set to one neighbor server
    /// (a late joiner has never seen it).
    fn advertise_to(&mut self, alias: u64) {
        if self.advertised_topics.is_empty() {
            return;
        }
        let Some(frame) = Self::encode_interest(&self.advertised_topics) else {
            return;
        };
        let Some(peer) = self.peers.get(&alias) else {
            return;
        };
        if matches!(peer.reliable.push(frame), Err(PushError::Overflow)) {
            metrics::reliable_overflow();
            self.close_peer(alias, CloseReason::QueueOverflow);
        }
    }

    fn encode_interest(topics: &HashSet<String>) -> Option<Bytes> {
        let payload = match atoll_wire::encode_topic_set(
            topics.iter().map(String::as_str),
            TopicEncoding::Gzip,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                error!("cannot encode interest set: {e}");
                return None;
            }
        };
        Some(encode(&Message::TopicSubscription {
            format: TopicEncoding::Gzip,
            topics: payload,
        }))
    }

    // ── Fan-out ─────────────────────────────────────────────────────────

    fn fanout(&mut self, sender: u64, kind: ChannelKind, mut frame: Vec<u8>) {
        let header = match TopicHeader::parse(&frame) {
            Ok(header) => header,
            Err(e) => {
                debug!(sender, "bad topic frame: {e}");
                self.close_peer(sender, CloseReason::ProtocolError);
                return;
            }
        };
        let sender_role = match self.peers.get(&sender) {
            Some(peer) => peer.role,
            None => return,
        };

        // Stamp the sender once; every recipient shares the same buffer.
        if patch_from_alias(&mut frame, sender).is_err() {
            self.close_peer(sender, CloseReason::ProtocolError);
            return;
        }
        let frame = Bytes::from(frame);

        let Some(subscribers) = self.index.subscribers(&header.topic) else {
            return; // Nobody local cares.
        };

        let mut overflowed = Vec::new();
        for &recipient in subscribers {
            if recipient == sender {
                continue; // No self-echo.
            }
            let Some(peer) = self.peers.get(&recipient) else {
                panic!(
                    "subscription index diverged: topic {:?} names departed peer {recipient}",
                    header.topic
                );
            };
            // Single-hop mesh: a frame that already crossed the server mesh
            // stops at local clients.
            if peer.role == Role::CommunicationServer && sender_role == Role::CommunicationServer {
                continue;
            }
            match peer.queue(kind).push(frame.clone()) {
                Ok(Pushed::Stored) => metrics::fanout_delivery(),
                Ok(Pushed::EvictedOldest) => {
                    metrics::unreliable_dropped();
                    metrics::fanout_delivery();
                }
                Err(PushError::Overflow) => {
                    metrics::reliable_overflow();
                    overflowed.push(recipient);
                }
                Err(PushError::Closed) => {}
            }
        }
        for recipient in overflowed {
            warn!(recipient, "reliable queue full, disconnecting peer");
            self.close_peer(recipient, CloseReason::QueueOverflow);
        }
    }

    // ── Teardown, sweeps, reporting ─────────────────────────────────────

    pub fn close_peer(&mut self, alias: u64, reason: CloseReason) {
        let Some(peer) = self.peers.remove(&alias) else {
            return;
        };
        if reason == CloseReason::AuthTimeout {
            metrics::auth_timeout();
        }
        info!(alias, ?reason, "peer closed");

        // Queues first: wakes both write pumps, discards pending frames, and
        // guarantees no later enqueue can succeed.
        peer.reliable.close();
        peer.unreliable.close();
        self.index.remove_peer(alias, &peer.topics);
        self.pending_server_dials.remove(&alias);
        if let Some(pc) = peer.conn {
            tokio::spawn(async move {
                let _ = pc.close().await;
            });
        }
        // A departing client may shrink the interest we mirror to the mesh.
        self.advertise_subscriptions();
        metrics::peers_connected(self.peers.len());
        metrics::topics_active(self.index.topic_count());
    }

    pub fn sweep_auth_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .peers
            .iter()
            .filter(|(_, p)| !p.is_authenticated && now >= p.auth_deadline)
            .map(|(alias, _)| *alias)
            .collect();
        for alias in expired {
            info!(alias, "authentication deadline expired");
            self.close_peer(alias, CloseReason::AuthTimeout);
        }
    }

    pub fn report(&self) {
        let snapshot = self.snapshot();
        self.reporter.report(&snapshot);
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        let mut peers: Vec<PeerReport> = self
            .peers
            .values()
            .map(|peer| PeerReport {
                alias: peer.alias,
                role: peer.role,
                is_authenticated: peer.is_authenticated,
                topics: peer.topics.iter().cloned().collect(),
            })
            .collect();
        peers.sort_by_key(|p| p.alias);
        BrokerSnapshot {
            alias: self.alias,
            peers,
            topic_count: self.index.topic_count(),
        }
    }

    fn send_signal(&self, msg: &Message) {
        if self.coordinator_tx.try_send(encode(msg)).is_err() {
            warn!(msg_type = ?msg.message_type(), "coordinator write queue unavailable");
        }
    }

    // ── Accessors used by tests and the reporter plumbing ───────────────

    pub fn peer(&self, alias: u64) -> Option<&Peer> {
        self.peers.get(&alias)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn index(&self) -> &SubscriptionIndex {
        &self.index
    }

    pub fn state_of(&self, alias: u64) -> Option<PeerState> {
        self.peers.get(&alias).map(|p| p.state)
    }
}
