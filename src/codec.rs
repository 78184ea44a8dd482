//! Wire format for domain events and streaming frames.
//!
//! A [`DomainEvent`] travels as a [`WireDomainEvent`]: the domain name, the
//! payload discriminator and the JSON body. [`EventCodec`] guards decoding
//! with an allow-list of discriminators so a client never hands a listener
//! a payload it has no type for.
//!
//! The streaming connector writes [`StreamFrame`]s as newline-delimited JSON;
//! [`FrameDecoder`] reassembles them from arbitrary body chunks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Domain, DomainEvent, Event, EventPayload, UnlistenEvent};
use crate::error::EventServiceError;

/// A domain event as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WireDomainEvent {
    /// Domain name.
    pub domain: String,
    /// Payload type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload body.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Body of a polling listen response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ListenResponse {
    /// Events in publish order; empty for a keep-alive.
    pub events: Vec<WireDomainEvent>,
}

/// One line of a streaming listen response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum StreamFrame {
    /// A batch of events.
    Events {
        /// Events in publish order.
        events: Vec<WireDomainEvent>,
    },
    /// Nothing happened during one wait.
    KeepAlive,
    /// The connection window ended; the client should reconnect.
    Cycle,
    /// The server no longer knows this client.
    Abort {
        /// Human-readable reason.
        reason: String,
    },
}

impl StreamFrame {
    /// Serializes the frame as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if an event body cannot be
    /// serialized.
    pub fn to_line(&self) -> Result<String, EventServiceError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses one line (with or without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] for malformed input.
    pub fn parse_line(line: &str) -> Result<Self, EventServiceError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Longest partial line a [`FrameDecoder`] buffers by default (8 MiB).
pub const DEFAULT_MAX_LINE_LEN: usize = 8 * 1024 * 1024;

/// Reassembles [`StreamFrame`]s from a chunked byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes at the start of `buffer` known to hold no newline.
    scanned: usize,
    max_line_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty decoder that refuses lines longer than
    /// `max_line_len` bytes.
    #[must_use]
    pub const fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_len,
        }
    }

    /// Feeds a chunk and returns every frame it completes.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if a complete line is not
    /// a valid frame, or if an unterminated line grows past the line limit.
    /// Frames completed before the bad line are lost.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>, EventServiceError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0usize;
        let mut scan = self.scanned;
        let outcome = loop {
            let rest = self.buffer.get(scan..).unwrap_or_default();
            let Some(offset) = rest.iter().position(|b| *b == b'\n') else {
                break Ok(());
            };
            let end = scan + offset;
            let parsed = parse_frame(self.buffer.get(start..end).unwrap_or_default());
            scan = end + 1;
            start = scan;
            match parsed {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        outcome?;

        if self.buffer.len() > self.max_line_len {
            let len = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(EventServiceError::Serialization(format!(
                "stream line of {len} bytes exceeds the {} byte limit",
                self.max_line_len
            )));
        }
        Ok(frames)
    }

    /// Returns `true` if a partial line is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Parses one line without its newline; blank lines yield `None`.
fn parse_frame(line: &[u8]) -> Result<Option<StreamFrame>, EventServiceError> {
    let text =
        std::str::from_utf8(line).map_err(|e| EventServiceError::Serialization(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    StreamFrame::parse_line(text).map(Some)
}

#[derive(Debug, Clone)]
enum AllowList {
    Any,
    Only(BTreeSet<String>),
}

/// Encodes and decodes domain events, checking payload discriminators.
///
/// A codec built with [`EventCodec::new`] accepts `unlisten` plus every type
/// added with [`EventCodec::register`]. [`EventCodec::permissive`] accepts
/// anything and is meant for relays that never decode payloads themselves.
#[derive(Debug, Clone)]
pub struct EventCodec {
    allowed: AllowList,
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCodec {
    /// Creates a codec that only knows [`UnlistenEvent`].
    #[must_use]
    pub fn new() -> Self {
        let mut allowed = BTreeSet::new();
        allowed.insert(UnlistenEvent::TYPE.to_string());
        Self {
            allowed: AllowList::Only(allowed),
        }
    }

    /// Creates a codec without an allow-list.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            allowed: AllowList::Any,
        }
    }

    /// Adds `T` to the allow-list.
    #[must_use]
    pub fn register<T: EventPayload>(self) -> Self {
        self.allow(T::TYPE)
    }

    /// Adds a raw discriminator to the allow-list.
    #[must_use]
    pub fn allow(mut self, event_type: impl Into<String>) -> Self {
        if let AllowList::Only(set) = &mut self.allowed {
            set.insert(event_type.into());
        }
        self
    }

    /// Returns `true` if events of `event_type` pass this codec.
    #[must_use]
    pub fn allows(&self, event_type: &str) -> bool {
        match &self.allowed {
            AllowList::Any => true,
            AllowList::Only(set) => set.contains(event_type),
        }
    }

    /// Encodes an event for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if the type is not allowed.
    pub fn encode(&self, event: &DomainEvent) -> Result<WireDomainEvent, EventServiceError> {
        self.check(&event.event.event_type)?;
        Ok(WireDomainEvent {
            domain: event.domain.name().to_string(),
            event_type: event.event.event_type.clone(),
            data: event.event.data.clone(),
        })
    }

    /// Decodes an event from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if the type is not allowed
    /// or the domain name is empty.
    pub fn decode(&self, wire: WireDomainEvent) -> Result<DomainEvent, EventServiceError> {
        self.check(&wire.event_type)?;
        let domain = Domain::new(&wire.domain)
            .map_err(|e| EventServiceError::Serialization(e.to_string()))?;
        Ok(DomainEvent::new(domain, Event::new(wire.event_type, wire.data)))
    }

    /// Encodes a batch, failing on the first rejected event.
    ///
    /// # Errors
    ///
    /// See [`EventCodec::encode`].
    pub fn encode_all(&self, events: &[DomainEvent]) -> Result<Vec<WireDomainEvent>, EventServiceError> {
        events.iter().map(|e| self.encode(e)).collect()
    }

    /// Decodes a batch, failing on the first rejected event.
    ///
    /// # Errors
    ///
    /// See [`EventCodec::decode`].
    pub fn decode_all(&self, events: Vec<WireDomainEvent>) -> Result<Vec<DomainEvent>, EventServiceError> {
        events.into_iter().map(|e| self.decode(e)).collect()
    }

    fn check(&self, event_type: &str) -> Result<(), EventServiceError> {
        if self.allows(event_type) {
            Ok(())
        } else {
            Err(EventServiceError::Serialization(format!(
                "event type `{event_type}` is not in the allow-list"
            )))
        }
    }
}
