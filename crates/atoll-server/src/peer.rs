//! Per-peer state held by the broker's central task.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;
use webrtc::peer_connection::RTCPeerConnection;

use atoll_wire::Role;

use crate::queue::{FrameQueue, OverflowPolicy};

/// The two data channels every peer connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Reliable,
    Unreliable,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Reliable => "reliable",
            Self::Unreliable => "unreliable",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "reliable" => Some(Self::Reliable),
            "unreliable" => Some(Self::Unreliable),
            _ => None,
        }
    }
}

/// Lifecycle of a remote peer as seen by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    DataChannelsOpening,
    AwaitingAuth,
    Authenticated,
}

pub struct Peer {
    pub alias: u64,
    pub role: Role,
    pub state: PeerState,
    pub is_authenticated: bool,
    /// Unauthenticated peers past this instant are swept away.
    pub auth_deadline: Instant,
    /// Whether we already pushed our own AUTH on the reliable channel
    /// (server↔server links authenticate both ways).
    pub auth_sent: bool,
    pub topics: HashSet<String>,
    pub reliable: Arc<FrameQueue>,
    pub unreliable: Arc<FrameQueue>,
    /// Absent for peers injected by tests; the broker only ever closes it.
    pub conn: Option<Arc<RTCPeerConnection>>,
    reliable_open: bool,
    unreliable_open: bool,
}

impl Peer {
    pub fn new(
        alias: u64,
        role: Role,
        reliable_capacity: usize,
        unreliable_capacity: usize,
        auth_deadline: Instant,
    ) -> Self {
        Self {
            alias,
            role,
            state: PeerState::Connecting,
            is_authenticated: false,
            auth_deadline,
            auth_sent: false,
            topics: HashSet::new(),
            reliable: Arc::new(FrameQueue::new(reliable_capacity, OverflowPolicy::Disconnect)),
            unreliable: Arc::new(FrameQueue::new(
                unreliable_capacity,
                OverflowPolicy::DropOldest,
            )),
            conn: None,
            reliable_open: false,
            unreliable_open: false,
        }
    }

    pub fn queue(&self, kind: ChannelKind) -> &Arc<FrameQueue> {
        match kind {
            ChannelKind::Reliable => &self.reliable,
            ChannelKind::Unreliable => &self.unreliable,
        }
    }

    /// Record a channel opening; returns true once both channels are up.
    pub fn channel_opened(&mut self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Reliable => self.reliable_open = true,
            ChannelKind::Unreliable => self.unreliable_open = true,
        }
        let both = self.reliable_open && self.unreliable_open;
        self.state = if both {
            PeerState::AwaitingAuth
        } else {
            PeerState::DataChannelsOpening
        };
        both
    }

    /// `is_authenticated` flips false→true exactly once.
    pub fn promote(&mut self) {
        debug_assert!(!self.is_authenticated, "peer authenticated twice");
        self.is_authenticated = true;
        self.state = PeerState::Authenticated;
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("alias", &self.alias)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("is_authenticated", &self.is_authenticated)
            .field("topics", &self.topics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_labels_round_trip() {
        for kind in [ChannelKind::Reliable, ChannelKind::Unreliable] {
            assert_eq!(ChannelKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(ChannelKind::from_label("video"), None);
    }

    #[test]
    fn both_channels_reach_awaiting_auth() {
        let mut peer = Peer::new(1, Role::Unknown, 4, 4, Instant::now());
        assert!(!peer.channel_opened(ChannelKind::Reliable));
        assert_eq!(peer.state, PeerState::DataChannelsOpening);
        assert!(peer.channel_opened(ChannelKind::Unreliable));
        assert_eq!(peer.state, PeerState::AwaitingAuth);
    }
}
