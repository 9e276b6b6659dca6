//! Core chat types: identifiers, messages, attachments and delivery state.
//!
//! Authoritative ids ([`MessageId`]) and client correlation keys
//! ([`LocalId`]) are distinct newtypes, so a placeholder key can never be
//! looked up, persisted or broadcast as if it were a server id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by every minted [`LocalId`].
///
/// Server ids never start with it, which keeps the two keyspaces disjoint
/// even when both are rendered as plain strings.
pub const LOCAL_ID_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Authoritative message id assigned by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a server-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-only correlation key for an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Mint a fresh, collision-free local id (`local-<uuid v4>`).
    pub fn mint() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a conversation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant (coach or client) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a participant id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Attachment media category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Anything else (documents, audio).
    Other,
}

/// An uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Opaque storage reference returned by the upload collaborator.
    pub path: String,
    /// Media category.
    pub media_type: MediaType,
}

/// A local file waiting to be uploaded as part of a send.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingUpload {
    /// Original file name.
    pub name: String,
    /// Media category.
    pub media_type: MediaType,
    /// File contents.
    pub data: Vec<u8>,
}

impl PendingUpload {
    /// Build an upload from raw bytes.
    pub fn new(name: impl Into<String>, media_type: MediaType, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type,
            data,
        }
    }

    /// Size of the file in bytes.
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.data.len()).unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpload")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size_bytes", &self.data.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Delivery state
// ---------------------------------------------------------------------------

/// Delivery state of a message, carrying the key valid in that state.
///
/// Only `Sent` has an authoritative id; every other state is keyed by the
/// local id minted at submit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Delivery {
    /// Drafted locally, not yet submitted.
    Composing {
        /// Correlation key.
        local_id: LocalId,
    },
    /// Submitted; awaiting the authoritative record.
    Pending {
        /// Correlation key.
        local_id: LocalId,
    },
    /// Authoritative record merged in.
    Sent {
        /// Server-assigned id.
        id: MessageId,
        /// Client reference echoed by the server, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_id: Option<LocalId>,
    },
    /// Upload or persistence failed; retryable.
    Failed {
        /// Correlation key.
        local_id: LocalId,
        /// Human-readable failure cause.
        reason: String,
    },
}

impl Delivery {
    /// Short state label for logs and transition errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Composing { .. } => "composing",
            Self::Pending { .. } => "pending",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
        }
    }

    /// Authoritative id, present only once sent.
    pub fn id(&self) -> Option<&MessageId> {
        match self {
            Self::Sent { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Local correlation key, if this message originated from a local send.
    pub fn local_id(&self) -> Option<&LocalId> {
        match self {
            Self::Composing { local_id }
            | Self::Pending { local_id }
            | Self::Failed { local_id, .. } => Some(local_id),
            Self::Sent { local_id, .. } => local_id.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message as held by the store and rendered by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Delivery state and identity.
    pub delivery: Delivery,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: ParticipantId,
    /// Addressee.
    pub recipient_id: ParticipantId,
    /// Optional text body.
    pub content: Option<String>,
    /// Ordered attachments.
    pub attachments: Vec<Attachment>,
    /// Logical instant used for ordering.
    pub timestamp: DateTime<Utc>,
    /// Whether the recipient has read it. Monotonic.
    pub read: bool,
}

impl Message {
    /// Build a locally drafted message in the `Composing` state.
    pub fn draft(
        local_id: LocalId,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        recipient_id: ParticipantId,
        content: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery: Delivery::Composing { local_id },
            conversation_id,
            sender_id,
            recipient_id,
            content,
            attachments: Vec::new(),
            timestamp,
            read: false,
        }
    }

    /// Authoritative id, if sent.
    pub fn id(&self) -> Option<&MessageId> {
        self.delivery.id()
    }

    /// Local correlation key, if any.
    pub fn local_id(&self) -> Option<&LocalId> {
        self.delivery.local_id()
    }

    /// Key used to break timestamp ties: the server id once known,
    /// otherwise the local id.
    pub fn order_key(&self) -> &str {
        match &self.delivery {
            Delivery::Sent { id, .. } => id.as_str(),
            other => other.local_id().map(LocalId::as_str).unwrap_or_default(),
        }
    }

    /// Whether this message was authored by `who`.
    pub fn is_from(&self, who: &ParticipantId) -> bool {
        &self.sender_id == who
    }
}

/// Authoritative message record returned by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Server-assigned id.
    pub id: MessageId,
    /// Client reference supplied on create, echoed back.
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
    /// Server timestamp.
    pub timestamp: DateTime<Utc>,
    /// Read flag as persisted.
    #[serde(default)]
    pub read: bool,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            delivery: Delivery::Sent {
                id: record.id,
                local_id: record.local_id,
            },
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            recipient_id: record.recipient_id,
            content: record.content,
            attachments: record.attachments,
            timestamp: record.timestamp,
            read: record.read,
        }
    }
}

/// Create request sent to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Client reference, echoed on the resulting record.
    pub local_id: LocalId,
    /// Conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: ParticipantId,
    /// Addressee.
    pub recipient_id: ParticipantId,
    /// Optional text body.
    pub content: Option<String>,
    /// Already-uploaded attachments.
    pub attachments: Vec<Attachment>,
    /// Client timestamp of the submit.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation, typing and receipts
// ---------------------------------------------------------------------------

/// A two-party conversation as seen from the local participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// The local participant.
    pub self_id: ParticipantId,
    /// The other participant.
    pub peer_id: ParticipantId,
}

impl Conversation {
    /// Build a conversation between `self_id` and `peer_id`.
    pub fn new(id: ConversationId, self_id: ParticipantId, peer_id: ParticipantId) -> Self {
        Self {
            id,
            self_id,
            peer_id,
        }
    }
}

/// Ephemeral typing state for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    /// Who is (or stopped) typing.
    pub participant_id: ParticipantId,
    /// Current typing flag.
    pub is_typing: bool,
    /// When the flag was last updated locally.
    pub last_updated: DateTime<Utc>,
}

/// Read receipt broadcast for a batch of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    /// Conversation the ids belong to.
    pub conversation_id: ConversationId,
    /// Messages that were read.
    pub message_ids: Vec<MessageId>,
    /// Who read them.
    pub reader_id: ParticipantId,
}
