//! Persistence collaborator abstraction.
//!
//! The backend is the durability source of truth: it assigns authoritative
//! message ids, stores read flags and hosts attachment uploads. The core
//! depends only on the [`ChatBackend`] trait.
//!
//! Two implementations ship with the crate:
//! - [`http::HttpBackend`]: REST client built on `reqwest`
//! - [`memory::MemoryBackend`]: in-process store for replay and tests

use async_trait::async_trait;

use crate::types::{Attachment, ConversationId, MessageId, MessageRecord, NewMessage, PendingUpload};

pub mod http;
pub mod memory;

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The endpoint URL could not be built.
    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    /// The requested conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// The backend refused the request (validation, limits).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The backend is temporarily unavailable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable persistence operations used by the sync core.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch the authoritative history of a conversation.
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, BackendError>;

    /// Durably create a message, returning its authoritative record.
    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, BackendError>;

    /// Persist read flags for a batch of messages. Idempotent.
    async fn mark_as_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), BackendError>;

    /// Upload a batch of files, returning their storage references in order.
    async fn upload_attachments(
        &self,
        conversation_id: &ConversationId,
        uploads: &[PendingUpload],
    ) -> Result<Vec<Attachment>, BackendError>;
}
