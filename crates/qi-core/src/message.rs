//! The message envelope and its sum-typed `type` field.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::error::ValidationError;
use crate::session::Session;

const MAX_TOPIC_LEN: usize = 200;
const MAX_TARGET_LEN: usize = 50;
const MAX_PAYLOAD_KEYS: usize = 100;

/// The kind of a [`Message`]. Serializes as a lowercase string on the
/// wire, matching the external interface's `{event, request, reply}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Fire-and-forget notification.
    Event,
    /// Outbound call awaiting exactly one [`MessageType::Reply`].
    Request,
    /// Answer to a prior [`MessageType::Request`], matched by `reply_to`.
    Reply,
}

/// The routing envelope exchanged between clients and the bus.
///
/// See the crate-level invariants: topic never contains wildcards, a
/// REPLY always carries `reply_to`, and `sender.id` need not name a
/// currently registered session (the bus itself originates messages
/// under the reserved hub identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id for this message. For a REQUEST, this doubles as the
    /// pending-request id that a matching REPLY's `reply_to` must equal.
    pub message_id: String,
    /// Routing topic, 1-200 characters, no `*` or `>`.
    pub topic: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// The originating session.
    pub sender: Session,
    /// Recipient logical ids, at most 50. Empty means "resolve via
    /// `bubble` or broadcast" (see destination resolution).
    #[serde(default)]
    pub target: Vec<String>,
    /// For a REPLY, the `message_id` of the REQUEST being answered.
    pub reply_to: Option<String>,
    /// Optional business metadata, not used for routing.
    pub context: Option<Context>,
    /// Arbitrary payload, at most 100 top-level keys.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Wall-clock seconds at creation.
    pub timestamp: f64,
    /// If true and `target` is empty, route to the sender's parent
    /// session instead of broadcasting.
    #[serde(default)]
    pub bubble: bool,
}

impl Message {
    /// Starts building a new message of the given type.
    pub fn builder(message_type: MessageType, sender: Session, topic: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(message_type, sender, topic)
    }

    /// Validates this message against the envelope invariants. Construct
    /// messages through [`MessageBuilder`] to get this for free; this is
    /// exposed separately because messages also arrive over the wire and
    /// must be re-validated at the transport boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_topic(&self.topic)?;
        if self.target.len() > MAX_TARGET_LEN {
            return Err(ValidationError::TargetTooLarge {
                len: self.target.len(),
            });
        }
        if self.payload.len() > MAX_PAYLOAD_KEYS {
            return Err(ValidationError::PayloadTooLarge {
                len: self.payload.len(),
            });
        }
        if self.message_type == MessageType::Reply && self.reply_to.is_none() {
            return Err(ValidationError::MissingReplyTo);
        }
        Ok(())
    }
}

fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    let len = topic.chars().count();
    if len == 0 || len > MAX_TOPIC_LEN || topic.contains('*') || topic.contains('>') {
        return Err(ValidationError::InvalidTopic {
            topic: topic.to_string(),
        });
    }
    Ok(())
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Builder for [`Message`], validating invariants before construction so
/// an invalid envelope can never be assembled in process.
pub struct MessageBuilder {
    message_id: String,
    topic: String,
    message_type: MessageType,
    sender: Session,
    target: Vec<String>,
    reply_to: Option<String>,
    context: Option<Context>,
    payload: Map<String, Value>,
    bubble: bool,
}

impl MessageBuilder {
    /// Starts a new builder with a freshly generated `message_id`.
    pub fn new(message_type: MessageType, sender: Session, topic: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            message_type,
            sender,
            target: Vec::new(),
            reply_to: None,
            context: None,
            payload: Map::new(),
            bubble: false,
        }
    }

    /// Overrides the generated `message_id`. Used by `request()` to mint
    /// a request id up front, and by auto-reply construction to echo the
    /// correlating id.
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Sets the target list.
    pub fn target(mut self, target: Vec<String>) -> Self {
        self.target = target;
        self
    }

    /// Sets `reply_to`.
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the business context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Sets `bubble`.
    pub fn bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }

    /// Validates and constructs the [`Message`].
    pub fn build(self) -> Result<Message, ValidationError> {
        let message = Message {
            message_id: self.message_id,
            topic: self.topic,
            message_type: self.message_type,
            sender: self.sender,
            target: self.target,
            reply_to: self.reply_to,
            context: self.context,
            payload: self.payload,
            timestamp: now_secs(),
            bubble: self.bubble,
        };
        message.validate()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Session {
        Session::new("s1").unwrap()
    }

    #[test]
    fn rejects_wildcard_topics() {
        let err = Message::builder(MessageType::Event, sender(), "svc.*").build();
        assert!(matches!(err, Err(ValidationError::InvalidTopic { .. })));
    }

    #[test]
    fn rejects_oversized_target() {
        let target = (0..51).map(|i| i.to_string()).collect();
        let err = Message::builder(MessageType::Event, sender(), "svc.echo")
            .target(target)
            .build();
        assert!(matches!(err, Err(ValidationError::TargetTooLarge { len: 51 })));
    }

    #[test]
    fn reply_requires_reply_to() {
        let err = Message::builder(MessageType::Reply, sender(), "svc.echo").build();
        assert!(matches!(err, Err(ValidationError::MissingReplyTo)));

        let ok = Message::builder(MessageType::Reply, sender(), "svc.echo")
            .reply_to("req-1")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn valid_message_round_trips_through_json() {
        let msg = Message::builder(MessageType::Event, sender(), "svc.echo")
            .build()
            .unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic, "svc.echo");
        assert_eq!(back.message_type, MessageType::Event);
    }
}
