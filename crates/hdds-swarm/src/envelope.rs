// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Swarm wire envelope.
//!
//! Every message is a multi-frame transport message with one of three shapes:
//!
//! ```text
//! [topic]                           bare topic
//! [topic, reply_address]            address only, no content expected
//! [topic, reply_address, payload]   request or reply with content
//! ```
//!
//! A drone only answers the three-frame shape. A two-frame shape is an
//! unaddressed broadcast.

use crate::codec::{self, CodecError};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Raw multi-frame transport message.
pub type Frames = Vec<Vec<u8>>;

/// Envelope errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unexpected frame count: {0}")]
    Arity(usize),

    #[error("frame {0} is not valid UTF-8")]
    NotUtf8(usize),
}

/// Payload classification applied by `publish`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No content frame at all.
    #[default]
    None,
    /// Explicit empty content frame ("answered with nothing").
    Empty,
    /// Pre-serialized content, sent verbatim.
    Raw(Vec<u8>),
    /// Structured content, packed through the codec.
    Value(Value),
}

impl Payload {
    /// Resolve the content frame, if any.
    pub fn into_frame(self) -> Result<Option<Vec<u8>>, CodecError> {
        match self {
            Self::None => Ok(None),
            Self::Empty => Ok(Some(Vec::new())),
            Self::Raw(bytes) => Ok(Some(bytes)),
            Self::Value(value) => codec::pack(&value).map(Some),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Option<Value>> for Payload {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::None, Self::Value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Raw(bytes)
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Raw(text.as_bytes().to_vec())
        }
    }
}

/// Decoded swarm message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub reply_address: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl Envelope {
    /// Build an envelope, classifying the payload.
    pub fn new(
        topic: impl Into<String>,
        reply_address: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            topic: topic.into(),
            reply_address: Some(reply_address.into()),
            payload: payload.into_frame()?,
        })
    }

    /// Encode to transport frames.
    ///
    /// A payload without reply address is not representable on the wire; the
    /// reply address frame is emitted empty in that case.
    pub fn into_frames(self) -> Frames {
        let mut frames = Vec::with_capacity(3);
        frames.push(self.topic.into_bytes());
        match (self.reply_address, self.payload) {
            (None, None) => {}
            (Some(addr), None) => frames.push(addr.into_bytes()),
            (addr, Some(payload)) => {
                frames.push(addr.unwrap_or_default().into_bytes());
                frames.push(payload);
            }
        }
        frames
    }

    /// Decode transport frames.
    pub fn from_frames(mut frames: Frames) -> Result<Self, EnvelopeError> {
        if frames.is_empty() || frames.len() > 3 {
            return Err(EnvelopeError::Arity(frames.len()));
        }
        let payload = if frames.len() == 3 { frames.pop() } else { None };
        let reply_address = if frames.len() == 2 {
            let raw = frames.pop().unwrap_or_default();
            Some(String::from_utf8(raw).map_err(|_| EnvelopeError::NotUtf8(1))?)
        } else {
            None
        };
        let topic = String::from_utf8(frames.pop().unwrap_or_default())
            .map_err(|_| EnvelopeError::NotUtf8(0))?;
        Ok(Self {
            topic,
            reply_address,
            payload,
        })
    }
}

/// Human-readable rendering of a frame list, for diagnostics.
pub struct FramesDisplay<'a>(pub &'a [Vec<u8>]);

impl fmt::Display for FramesDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = |frame: &[u8]| String::from_utf8_lossy(frame).into_owned();
        match self.0 {
            [topic, reply, payload] => write!(
                f,
                "<TOPIC:{}><REPLY-TO:{}>{}",
                text(topic),
                text(reply),
                render_payload(payload)
            ),
            [topic, reply] => write!(f, "<TOPIC:{}><REPLY-TO:{}><NULL>", text(topic), text(reply)),
            [single] => match single.split_first() {
                Some((0x01, topic)) => write!(f, "<SUBSCRIBE-TO>{}", text(topic)),
                Some((0x00, topic)) => write!(f, "<UNSUBSCRIBE-FROM>{}", text(topic)),
                Some(_) => write!(f, "<TOPIC:{}>", text(single)),
                None => write!(f, "<NULL>"),
            },
            other => write!(f, "<?{} frames>", other.len()),
        }
    }
}

fn render_payload(payload: &[u8]) -> String {
    if payload.is_empty() {
        return "<EMPTY>".to_string();
    }
    match codec::unpack::<Value>(payload) {
        Ok(value) => value.to_string(),
        Err(_) => format!("<{} bytes>", payload.len()),
    }
}
