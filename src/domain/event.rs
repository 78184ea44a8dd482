//! Application event payloads.
//!
//! The core never inspects payloads beyond their type discriminator, so an
//! [`Event`] carries the discriminator plus a JSON body. Applications work
//! with their own types through [`EventPayload`] and convert at the edges.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::EventServiceError;

/// A typed event that can travel through the registry.
///
/// `TYPE` is the discriminator written on the wire; it must be unique per
/// payload type and is what the codec allow-list is keyed on.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Wire discriminator of this payload type.
    const TYPE: &'static str;
}

/// Type-tagged event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Payload type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload body.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

impl Event {
    /// Creates an event from a raw discriminator and body.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Wraps a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if the payload cannot be
    /// represented as JSON.
    pub fn from_payload<T: EventPayload>(payload: &T) -> Result<Self, EventServiceError> {
        Ok(Self {
            event_type: T::TYPE.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Returns `true` if this event carries a `T`.
    #[must_use]
    pub fn is<T: EventPayload>(&self) -> bool {
        self.event_type == T::TYPE
    }

    /// Decodes the body as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if the discriminator does
    /// not match `T::TYPE` or the body does not deserialize.
    pub fn decode<T: EventPayload>(&self) -> Result<T, EventServiceError> {
        if !self.is::<T>() {
            return Err(EventServiceError::Serialization(format!(
                "expected event type {}, got {}",
                T::TYPE,
                self.event_type
            )));
        }
        Ok(T::deserialize(&self.data)?)
    }

    /// Returns a field of the body, if the body is an object.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ChatMessage {
        from: String,
        text: String,
    }

    impl EventPayload for ChatMessage {
        const TYPE: &'static str = "chat_message";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping;

    impl EventPayload for Ping {
        const TYPE: &'static str = "ping";
    }

    #[test]
    fn typed_payload_converts_both_ways() {
        let msg = ChatMessage {
            from: "ann".into(),
            text: "hi".into(),
        };
        let Ok(event) = Event::from_payload(&msg) else {
            panic!("payload serializes");
        };
        assert_eq!(event.event_type, "chat_message");
        assert!(event.is::<ChatMessage>());
        assert_eq!(event.decode::<ChatMessage>().ok(), Some(msg));
    }

    #[test]
    fn decode_rejects_other_type() {
        let Ok(event) = Event::from_payload(&Ping) else {
            panic!("payload serializes");
        };
        assert!(matches!(
            event.decode::<ChatMessage>(),
            Err(EventServiceError::Serialization(_))
        ));
    }

    #[test]
    fn field_reads_object_members() {
        let event = Event::new("chat_message", serde_json::json!({ "from": "bob" }));
        assert_eq!(event.field("from"), Some(&serde_json::json!("bob")));
        assert_eq!(event.field("text"), None);
    }
}
