//! Protocol message types.

use bytes::Bytes;

use crate::topics::TopicEncoding;
use crate::WireError;

/// Wire type tags. Append-only — never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Welcome = 1,
    Connect = 2,
    WebRtcOffer = 3,
    WebRtcAnswer = 4,
    WebRtcIceCandidate = 5,
    Auth = 6,
    Topic = 7,
    TopicSubscription = 8,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            1 => Ok(Self::Welcome),
            2 => Ok(Self::Connect),
            3 => Ok(Self::WebRtcOffer),
            4 => Ok(Self::WebRtcAnswer),
            5 => Ok(Self::WebRtcIceCandidate),
            6 => Ok(Self::Auth),
            7 => Ok(Self::Topic),
            8 => Ok(Self::TopicSubscription),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Peer role, declared at registration and in AUTH frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    #[default]
    Unknown = 0,
    Client = 1,
    CommunicationServer = 2,
}

impl Role {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Client),
            2 => Ok(Self::CommunicationServer),
            other => Err(WireError::UnknownRole(other)),
        }
    }
}

/// A decoded protocol message.
///
/// `from_alias` fields are authoritative only after a relay has rewritten
/// them: the coordinator stamps the sender's alias on every relayed signaling
/// frame, and a comm-server stamps it on every fanned-out topic frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Registration reply: the assigned alias and the servers to dial.
    Welcome {
        alias: u64,
        available_servers: Vec<u64>,
    },
    /// Ask `to_alias` (relayed through the coordinator) to open a WebRTC
    /// connection back to `from_alias` by sending an offer.
    Connect { from_alias: u64, to_alias: u64 },
    WebRtcOffer {
        from_alias: u64,
        to_alias: u64,
        sdp: String,
    },
    WebRtcAnswer {
        from_alias: u64,
        to_alias: u64,
        sdp: String,
    },
    WebRtcIceCandidate {
        from_alias: u64,
        to_alias: u64,
        candidate: String,
    },
    /// Credential presentation. `body` is opaque to the core; only the named
    /// authenticator interprets it.
    Auth {
        role: Role,
        method: String,
        body: Bytes,
    },
    /// A publication on `topic`. The body is never inspected by the broker.
    Topic {
        from_alias: u64,
        topic: String,
        body: Bytes,
    },
    /// Full replacement of the sender's subscription set.
    TopicSubscription {
        format: TopicEncoding,
        topics: Bytes,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Welcome { .. } => MessageType::Welcome,
            Message::Connect { .. } => MessageType::Connect,
            Message::WebRtcOffer { .. } => MessageType::WebRtcOffer,
            Message::WebRtcAnswer { .. } => MessageType::WebRtcAnswer,
            Message::WebRtcIceCandidate { .. } => MessageType::WebRtcIceCandidate,
            Message::Auth { .. } => MessageType::Auth,
            Message::Topic { .. } => MessageType::Topic,
            Message::TopicSubscription { .. } => MessageType::TopicSubscription,
        }
    }
}
