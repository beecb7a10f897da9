//! Binary encoding and decoding of [`Message`] frames.
//!
//! Layout conventions: integers are big-endian; strings carry a `u16` length
//! prefix, byte fields a `u32` length prefix. Every frame whose semantics
//! involve a sender (`Connect`, the three `WebRtc*` variants, `Topic`) stores
//! `from_alias` at a fixed offset right after the tag, so relays rewrite it
//! with [`patch_from_alias`] instead of re-encoding the frame.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::{Message, MessageType, Role};
use crate::topics::TopicEncoding;
use crate::WireError;

/// Byte range of the `from_alias` field in patchable frames.
pub const FROM_ALIAS_RANGE: Range<usize> = 1..9;

/// Read the type tag without decoding the frame.
pub fn peek_type(buf: &[u8]) -> Result<MessageType, WireError> {
    let tag = *buf.first().ok_or(WireError::Truncated { needed: 1 })?;
    MessageType::from_tag(tag)
}

/// Encode a message into a standalone frame.
pub fn encode(msg: &Message) -> Bytes {
    let mut dst = BytesMut::with_capacity(estimate(msg));
    dst.put_u8(msg.message_type().tag());
    match msg {
        Message::Welcome {
            alias,
            available_servers,
        } => {
            dst.put_u64(*alias);
            dst.put_u16(available_servers.len() as u16);
            for server in available_servers {
                dst.put_u64(*server);
            }
        }
        Message::Connect {
            from_alias,
            to_alias,
        } => {
            dst.put_u64(*from_alias);
            dst.put_u64(*to_alias);
        }
        Message::WebRtcOffer {
            from_alias,
            to_alias,
            sdp,
        }
        | Message::WebRtcAnswer {
            from_alias,
            to_alias,
            sdp,
        } => {
            dst.put_u64(*from_alias);
            dst.put_u64(*to_alias);
            put_str(&mut dst, sdp);
        }
        Message::WebRtcIceCandidate {
            from_alias,
            to_alias,
            candidate,
        } => {
            dst.put_u64(*from_alias);
            dst.put_u64(*to_alias);
            put_str(&mut dst, candidate);
        }
        Message::Auth { role, method, body } => {
            dst.put_u8(role.tag());
            put_str(&mut dst, method);
            put_bytes(&mut dst, body);
        }
        Message::Topic {
            from_alias,
            topic,
            body,
        } => {
            dst.put_u64(*from_alias);
            put_str(&mut dst, topic);
            put_bytes(&mut dst, body);
        }
        Message::TopicSubscription { format, topics } => {
            dst.put_u8(format.tag());
            put_bytes(&mut dst, topics);
        }
    }
    dst.freeze()
}

/// Decode one complete frame.
pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
    let mut r = Reader::new(buf);
    let msg_type = MessageType::from_tag(r.u8()?)?;
    let msg = match msg_type {
        MessageType::Welcome => {
            let alias = r.u64()?;
            let count = r.u16()? as usize;
            let mut available_servers = Vec::with_capacity(count);
            for _ in 0..count {
                available_servers.push(r.u64()?);
            }
            Message::Welcome {
                alias,
                available_servers,
            }
        }
        MessageType::Connect => Message::Connect {
            from_alias: r.u64()?,
            to_alias: r.u64()?,
        },
        MessageType::WebRtcOffer => Message::WebRtcOffer {
            from_alias: r.u64()?,
            to_alias: r.u64()?,
            sdp: r.string()?,
        },
        MessageType::WebRtcAnswer => Message::WebRtcAnswer {
            from_alias: r.u64()?,
            to_alias: r.u64()?,
            sdp: r.string()?,
        },
        MessageType::WebRtcIceCandidate => Message::WebRtcIceCandidate {
            from_alias: r.u64()?,
            to_alias: r.u64()?,
            candidate: r.string()?,
        },
        MessageType::Auth => Message::Auth {
            role: Role::from_tag(r.u8()?)?,
            method: r.string()?,
            body: r.bytes()?,
        },
        MessageType::Topic => Message::Topic {
            from_alias: r.u64()?,
            topic: r.string()?,
            body: r.bytes()?,
        },
        MessageType::TopicSubscription => Message::TopicSubscription {
            format: TopicEncoding::from_tag(r.u8()?)?,
            topics: r.bytes()?,
        },
    };
    Ok(msg)
}

/// Overwrite the `from_alias` field of an already-encoded frame.
///
/// Only frames that carry the field at [`FROM_ALIAS_RANGE`] are patchable;
/// anything else is a caller bug surfaced as [`WireError::NotPatchable`].
pub fn patch_from_alias(frame: &mut [u8], alias: u64) -> Result<(), WireError> {
    let msg_type = peek_type(frame)?;
    match msg_type {
        MessageType::Connect
        | MessageType::WebRtcOffer
        | MessageType::WebRtcAnswer
        | MessageType::WebRtcIceCandidate
        | MessageType::Topic => {}
        other => return Err(WireError::NotPatchable(other)),
    }
    if frame.len() < FROM_ALIAS_RANGE.end {
        return Err(WireError::Truncated {
            needed: FROM_ALIAS_RANGE.end - frame.len(),
        });
    }
    frame[FROM_ALIAS_RANGE].copy_from_slice(&alias.to_be_bytes());
    Ok(())
}

/// The fixed-offset prefix shared by every relayed signaling frame
/// (`Connect` and the three `WebRtc*` variants): tag, sender, target.
///
/// Relays route on `to_alias` and stamp `from_alias` without decoding the
/// SDP or candidate payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub msg_type: MessageType,
    pub from_alias: u64,
    pub to_alias: u64,
}

impl RelayHeader {
    pub fn parse(frame: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(frame);
        let msg_type = MessageType::from_tag(r.u8()?)?;
        match msg_type {
            MessageType::Connect
            | MessageType::WebRtcOffer
            | MessageType::WebRtcAnswer
            | MessageType::WebRtcIceCandidate => {}
            other => return Err(WireError::NotPatchable(other)),
        }
        Ok(RelayHeader {
            msg_type,
            from_alias: r.u64()?,
            to_alias: r.u64()?,
        })
    }
}

/// The decoded prefix of a `Topic` frame — everything except the body.
///
/// This is the fan-out fast path: the broker reads the topic to pick
/// recipients and never allocates for the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHeader {
    pub from_alias: u64,
    pub topic: String,
}

impl TopicHeader {
    pub fn parse(frame: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(frame);
        match MessageType::from_tag(r.u8()?)? {
            MessageType::Topic => {}
            other => return Err(WireError::NotPatchable(other)),
        }
        Ok(TopicHeader {
            from_alias: r.u64()?,
            topic: r.string()?,
        })
    }
}

fn estimate(msg: &Message) -> usize {
    match msg {
        Message::Welcome {
            available_servers, ..
        } => 11 + available_servers.len() * 8,
        Message::Connect { .. } => 17,
        Message::WebRtcOffer { sdp, .. } | Message::WebRtcAnswer { sdp, .. } => 19 + sdp.len(),
        Message::WebRtcIceCandidate { candidate, .. } => 19 + candidate.len(),
        Message::Auth { method, body, .. } => 8 + method.len() + body.len(),
        Message::Topic { topic, body, .. } => 15 + topic.len() + body.len(),
        Message::TopicSubscription { topics, .. } => 6 + topics.len(),
    }
}

fn put_str(dst: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize);
    dst.put_u16(s.len() as u16);
    dst.put_slice(s.as_bytes());
}

fn put_bytes(dst: &mut BytesMut, b: &[u8]) {
    dst.put_u32(b.len() as u32);
    dst.put_slice(b);
}

/// Cursor with explicit truncation errors.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| WireError::BadUtf8)
    }

    fn bytes(&mut self) -> Result<Bytes, WireError> {
        let len = self.u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}
