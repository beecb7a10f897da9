//! Topic-set encoding for `TOPIC_SUBSCRIPTION` frames.
//!
//! A subscription replaces the sender's whole topic set. On the wire the set
//! is the topic names joined by single spaces, optionally gzip-compressed;
//! the `format` field of the frame says which. Decoders must accept both.

use std::collections::HashSet;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::WireError;

/// Longest accepted topic name, in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

const SEPARATOR: char = ' ';

/// Encoding of the `topics` byte string. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TopicEncoding {
    #[default]
    Plain = 0,
    Gzip = 1,
}

impl TopicEncoding {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Gzip),
            other => Err(WireError::UnknownFormat(other)),
        }
    }
}

/// Check a single topic name against the wire constraints.
pub fn validate_topic(topic: &str) -> Result<(), WireError> {
    if topic.is_empty() {
        return Err(WireError::EmptyTopic);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(WireError::TopicTooLong(topic.len()));
    }
    if topic.contains(SEPARATOR) {
        return Err(WireError::TopicSeparator);
    }
    Ok(())
}

/// Encode a topic set for a subscription frame.
pub fn encode_topic_set<'a, I>(topics: I, encoding: TopicEncoding) -> Result<Bytes, WireError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut joined = String::new();
    for topic in topics {
        validate_topic(topic)?;
        if !joined.is_empty() {
            joined.push(SEPARATOR);
        }
        joined.push_str(topic);
    }
    match encoding {
        TopicEncoding::Plain => Ok(Bytes::from(joined)),
        TopicEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(joined.as_bytes())?;
            Ok(Bytes::from(encoder.finish()?))
        }
    }
}

/// Decode a subscription payload into the replacement topic set.
///
/// Duplicate names collapse; empty payload means "unsubscribe everything".
pub fn decode_topic_set(data: &[u8], encoding: TopicEncoding) -> Result<HashSet<String>, WireError> {
    let raw = match encoding {
        TopicEncoding::Plain => {
            std::str::from_utf8(data).map_err(|_| WireError::BadUtf8)?.to_owned()
        }
        TopicEncoding::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(WireError::Gzip)?;
            out
        }
    };

    let mut topics = HashSet::new();
    for topic in raw.split(SEPARATOR).filter(|t| !t.is_empty()) {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(WireError::TopicTooLong(topic.len()));
        }
        topics.insert(topic.to_owned());
    }
    Ok(topics)
}
