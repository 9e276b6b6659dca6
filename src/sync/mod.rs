//! Sync components: optimistic sender, read receipts, typing presence,
//! seen marker, and the shared state they mutate.
//!
//! # Locking
//!
//! All mutable state lives in one [`state::SharedState`] behind a sync
//! mutex. Critical sections never span an await: components take the lock,
//! mutate, publish a snapshot and release before calling a collaborator.
//! Every completion re-checks the conversation it was issued for, so results
//! that arrive after a conversation switch are dropped.

pub mod receipts;
pub mod seen;
pub mod sender;
pub mod state;
pub mod typing;

use crate::backend::BackendError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::types::LocalId;

/// Errors surfaced by the sync core.
///
/// None of these are fatal: send failures leave a retryable `Failed`
/// message behind, and everything else is a rejected request.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The push transport is down; the push path was skipped.
    #[error("push transport disconnected")]
    TransportDisconnected,

    /// The persistence collaborator failed.
    #[error("persistence failed: {0}")]
    PersistenceFailure(#[source] BackendError),

    /// Attachment upload failed; nothing was sent.
    #[error("attachment upload failed: {0}")]
    UploadFailure(#[source] BackendError),

    /// A single file exceeds the per-file cap.
    #[error("attachment {name} is {size} bytes, limit is {limit}")]
    AttachmentTooLarge {
        /// File name.
        name: String,
        /// File size in bytes.
        size: u64,
        /// Per-file limit in bytes.
        limit: u64,
    },

    /// The files of one message exceed the batch cap.
    #[error("attachments total {total} bytes, limit is {limit}")]
    BatchTooLarge {
        /// Combined size in bytes.
        total: u64,
        /// Batch limit in bytes.
        limit: u64,
    },

    /// Neither text nor attachments were given.
    #[error("message has no content")]
    EmptyMessage,

    /// No conversation is open.
    #[error("no active conversation")]
    NoActiveConversation,

    /// No failed send is known under this local id.
    #[error("nothing to retry for {0}")]
    NotRetryable(LocalId),

    /// A store invariant rejected the mutation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A push transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound push payload could not be decoded.
    #[error("malformed push event: {0}")]
    PushDecode(#[from] serde_json::Error),
}
