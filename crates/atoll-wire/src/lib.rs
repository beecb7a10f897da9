//! Wire protocol for the atoll broker.
//!
//! Every transport in the system (coordinator WebSockets, WebRTC data
//! channels) is message-oriented: one frame is exactly one encoded
//! [`Message`]. The encoding is a hand-rolled big-endian binary layout with a
//! single leading type tag so relays can dispatch on [`peek_type`] without
//! decoding, and so the fan-out hot path can read the topic header and patch
//! the sender alias in place without touching the payload.
//!
//! The type-tag enumeration is append-only; decoders reject tags they do not
//! know.

mod codec;
mod message;
mod topics;

pub use codec::{
    decode, encode, patch_from_alias, peek_type, RelayHeader, TopicHeader, FROM_ALIAS_RANGE,
};
pub use message::{Message, MessageType, Role};
pub use topics::{
    decode_topic_set, encode_topic_set, validate_topic, TopicEncoding, MAX_TOPIC_LEN,
};

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    #[error("unknown role tag {0}")]
    UnknownRole(u8),
    #[error("unknown topic encoding tag {0}")]
    UnknownFormat(u8),
    #[error("field is not valid UTF-8")]
    BadUtf8,
    #[error("topic of {0} bytes exceeds the {MAX_TOPIC_LEN}-byte limit")]
    TopicTooLong(usize),
    #[error("topic name is empty")]
    EmptyTopic,
    #[error("topic name contains the separator byte")]
    TopicSeparator,
    #[error("cannot patch from_alias into a {0:?} frame")]
    NotPatchable(MessageType),
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
}
