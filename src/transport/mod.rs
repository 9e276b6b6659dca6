//! Push transport abstraction.
//!
//! The push channel is low-latency but at-least-once, unordered and
//! duplicate-prone, and nothing survives a reconnect. The core only depends
//! on the [`PushTransport`] trait and the [`PushEvent`] wire shape, so it can
//! be driven without a real socket.
//!
//! One implementation ships with the crate:
//! - [`channel::ChannelTransport`]: forwards emits into a tokio mpsc channel

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Attachment, ConversationId, Delivery, LocalId, Message, MessageId, MessageRecord,
    ParticipantId, ReadReceiptEvent,
};

pub mod channel;

/// Errors from the push transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is not connected; the emit was not attempted.
    #[error("push transport disconnected")]
    Disconnected,

    /// The underlying channel is gone.
    #[error("push transport closed")]
    Closed,

    /// The event could not be encoded for the wire.
    #[error("failed to encode push event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Message payload carried by a `message` push event.
///
/// `id` is present when the event is an echo of an authoritative record;
/// a sender's own low-latency emit carries only its `local_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Authoritative id, if already assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Sender's correlation key, if the sender supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    /// Conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: ParticipantId,
    /// Addressee.
    pub recipient_id: ParticipantId,
    /// Optional text body.
    #[serde(default)]
    pub content: Option<String>,
    /// Ordered attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Ordering instant.
    pub timestamp: DateTime<Utc>,
}

impl PushMessage {
    /// Build the low-latency emit for a local message.
    pub fn from_local(message: &Message) -> Self {
        Self {
            id: message.id().cloned(),
            local_id: message.local_id().cloned(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            attachments: message.attachments.clone(),
            timestamp: message.timestamp,
        }
    }

    /// Convert into an authoritative record, if the event carries an id.
    ///
    /// # Errors
    ///
    /// Returns the payload unchanged when it has no authoritative id.
    pub fn into_record(self) -> Result<MessageRecord, Self> {
        match self.id {
            Some(id) => Ok(MessageRecord {
                id,
                local_id: self.local_id,
                conversation_id: self.conversation_id,
                sender_id: self.sender_id,
                recipient_id: self.recipient_id,
                content: self.content,
                attachments: self.attachments,
                timestamp: self.timestamp,
                read: false,
            }),
            None => Err(self),
        }
    }

    /// Convert into a provisional store entry, keyed by the sender's local id.
    ///
    /// Returns `None` when the payload has neither an id nor a local id.
    pub fn into_provisional(self) -> Option<Message> {
        let delivery = match (self.id, self.local_id) {
            (Some(id), local_id) => Delivery::Sent { id, local_id },
            (None, Some(local_id)) => Delivery::Pending { local_id },
            (None, None) => return None,
        };
        Some(Message {
            delivery,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            content: self.content,
            attachments: self.attachments,
            timestamp: self.timestamp,
            read: false,
        })
    }
}

/// Events carried by the push channel, in both directions.
///
/// The JSON form is internally tagged, `{"type": "message", ...}`, with
/// camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PushEvent {
    /// A chat message.
    Message(PushMessage),
    /// A typing transition.
    Typing {
        /// Who is typing.
        sender_id: ParticipantId,
        /// New typing flag.
        is_typing: bool,
    },
    /// A read receipt.
    Read(ReadReceiptEvent),
}

impl PushEvent {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing { .. } => "typing",
            Self::Read(_) => "read",
        }
    }

    /// Decode an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the serde error for malformed or unknown events.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode an event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound half of the push transport.
///
/// Inbound events are delivered by the host calling
/// [`ChatSession::handle_push`](crate::session::ChatSession::handle_push).
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Emit an event to the peer.
    async fn emit(&self, event: PushEvent) -> Result<(), TransportError>;
}
