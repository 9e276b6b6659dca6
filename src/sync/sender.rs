//! Optimistic sender: placeholder, dual-path send, reconciliation, retry.
//!
//! A submit inserts a `Pending` placeholder before any network call, uploads
//! attachments if there are any, then runs two independent paths at once:
//! a push emit for latency (skipped while disconnected) and a durable create
//! on the backend. Only the backend response settles the placeholder, keyed
//! by its local id and never by content, since two identical messages are
//! legitimate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::state::SharedState;
use super::SyncError;
use crate::backend::ChatBackend;
use crate::config::AttachmentLimits;
use crate::store::{ReconcileOutcome, StoreError};
use crate::transport::{PushEvent, PushMessage, PushTransport};
use crate::types::{Conversation, LocalId, Message, MessageId, NewMessage, PendingUpload};

/// How a send attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The authoritative record was merged in.
    Sent {
        /// Server-assigned id.
        id: MessageId,
    },
    /// Upload or persistence failed; the message is `Failed` and retryable.
    Failed {
        /// Failure cause shown to the user.
        reason: String,
    },
    /// The conversation changed before the attempt completed; the result
    /// was dropped.
    Discarded,
}

/// Result of [`OptimisticSender::submit`] or [`OptimisticSender::retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Correlation key of the message.
    pub local_id: LocalId,
    /// Whether the low-latency push emit went out.
    pub pushed: bool,
    /// Final state of this attempt.
    pub outcome: SendOutcome,
}

/// Everything needed to (re)run a send.
#[derive(Debug, Clone)]
struct Outbound {
    conversation: Conversation,
    content: Option<String>,
    uploads: Vec<PendingUpload>,
    timestamp: DateTime<Utc>,
}

/// Drives optimistic sends for the active conversation.
pub struct OptimisticSender {
    state: Arc<SharedState>,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn PushTransport>,
    limits: AttachmentLimits,
    /// Sends that have not reached `Sent`, kept for retry.
    outbound: Mutex<HashMap<LocalId, Outbound>>,
}

impl OptimisticSender {
    /// Create a sender over the given collaborators.
    pub fn new(
        state: Arc<SharedState>,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn PushTransport>,
        limits: AttachmentLimits,
    ) -> Self {
        Self {
            state,
            backend,
            transport,
            limits,
            outbound: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a new message.
    ///
    /// Size limits are checked before anything is inserted. The `Pending`
    /// placeholder is published before the first await, so subscribers see
    /// it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EmptyMessage`], [`SyncError::AttachmentTooLarge`],
    /// [`SyncError::BatchTooLarge`] or [`SyncError::NoActiveConversation`]
    /// when the message is rejected up front. Failures after the placeholder
    /// exists are reported in the receipt's outcome instead.
    pub async fn submit(
        &self,
        content: Option<String>,
        uploads: Vec<PendingUpload>,
    ) -> Result<SendReceipt, SyncError> {
        let content = content.filter(|c| !c.trim().is_empty());
        if content.is_none() && uploads.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        validate_uploads(&uploads, &self.limits)?;

        let local_id = LocalId::mint();
        let timestamp = Utc::now();
        let conversation = self.state.mutate(|core| {
            let conversation = core
                .conversation
                .clone()
                .ok_or(SyncError::NoActiveConversation)?;
            let draft = Message::draft(
                local_id.clone(),
                conversation.id.clone(),
                conversation.self_id.clone(),
                conversation.peer_id.clone(),
                content.clone(),
                timestamp,
            );
            core.store.insert_placeholder(draft)?;
            Ok::<_, SyncError>(conversation)
        })?;

        info!(
            local_id = %local_id,
            conversation = %conversation.id,
            attachments = uploads.len(),
            "message submitted"
        );
        self.outbound_map().insert(
            local_id.clone(),
            Outbound {
                conversation,
                content,
                uploads,
                timestamp,
            },
        );

        Ok(self.drive(local_id).await)
    }

    /// Retry a failed send under the same local id.
    ///
    /// Attachments are re-uploaded as a whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRetryable`] for unknown ids or ids whose
    /// message is no longer in the view,
    /// [`SyncError::NoActiveConversation`] if the message's conversation is
    /// no longer open, or [`SyncError::Store`] if the message is not `Failed`.
    pub async fn retry(&self, local_id: &LocalId) -> Result<SendReceipt, SyncError> {
        let conversation_id = self
            .outbound_map()
            .get(local_id)
            .map(|o| o.conversation.id.clone())
            .ok_or_else(|| SyncError::NotRetryable(local_id.clone()))?;

        let retrying = self
            .state
            .mutate_in(&conversation_id, |core| core.store.mark_retrying(local_id))
            .ok_or(SyncError::NoActiveConversation)?;
        if let Err(StoreError::UnknownLocalId(_)) = retrying {
            // The view was rebuilt since the failure; nothing left to retry.
            self.outbound_map().remove(local_id);
            return Err(SyncError::NotRetryable(local_id.clone()));
        }
        retrying?;

        info!(local_id = %local_id, "retrying send");
        Ok(self.drive(local_id.clone()).await)
    }

    /// Number of sends not yet settled as `Sent`.
    pub fn unsettled(&self) -> usize {
        self.outbound_map().len()
    }

    /// Drop sends that belong to a conversation other than the active one.
    ///
    /// Called after a switch: the old view is gone, so its failed messages
    /// can no longer be retried. Returns how many were dropped.
    pub fn forget_inactive(&self) -> usize {
        let active = self.state.active_conversation().map(|c| c.id);
        let mut outbound = self.outbound_map();
        let before = outbound.len();
        outbound.retain(|_, o| Some(&o.conversation.id) == active.as_ref());
        let dropped = before.saturating_sub(outbound.len());
        if dropped > 0 {
            debug!(dropped, "forgot sends of inactive conversations");
        }
        dropped
    }

    async fn drive(&self, local_id: LocalId) -> SendReceipt {
        let outbound = self.outbound_map().get(&local_id).cloned();
        let Some(outbound) = outbound else {
            return SendReceipt {
                local_id,
                pushed: false,
                outcome: SendOutcome::Discarded,
            };
        };
        let conversation_id = outbound.conversation.id.clone();

        // Uploads complete before either send path starts.
        let attachments = if outbound.uploads.is_empty() {
            Vec::new()
        } else {
            match self
                .backend
                .upload_attachments(&conversation_id, &outbound.uploads)
                .await
            {
                Ok(attachments) => attachments,
                Err(e) => {
                    warn!(local_id = %local_id, error = %e, "attachment upload failed");
                    return self.fail(local_id, &SyncError::UploadFailure(e), false);
                }
            }
        };

        let attached = self.state.mutate_in(&conversation_id, |core| {
            core.store.attach(&local_id, attachments.clone())?;
            Ok::<_, StoreError>(core.store.get_local(&local_id).cloned())
        });
        let message = match attached {
            None => return self.discard(local_id, false),
            Some(Err(StoreError::AttachmentsSealed(id))) => {
                // An echo of an earlier attempt already delivered it.
                info!(local_id = %local_id, id = %id, "message already sent");
                self.outbound_map().remove(&local_id);
                return SendReceipt {
                    local_id,
                    pushed: false,
                    outcome: SendOutcome::Sent { id },
                };
            }
            Some(Err(e)) => {
                warn!(local_id = %local_id, error = %e, "placeholder vanished before send");
                return self.discard(local_id, false);
            }
            Some(Ok(message)) => message,
        };

        let push = async {
            let Some(message) = message.as_ref() else {
                return false;
            };
            if !self.state.connection().is_connected() {
                debug!(local_id = %local_id, "{}; push path skipped", SyncError::TransportDisconnected);
                return false;
            }
            let event = PushEvent::Message(PushMessage::from_local(message));
            match self.transport.emit(event).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(local_id = %local_id, error = %e, "push emit failed");
                    false
                }
            }
        };
        let persist = self.backend.create_message(NewMessage {
            local_id: local_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: outbound.conversation.self_id.clone(),
            recipient_id: outbound.conversation.peer_id.clone(),
            content: outbound.content.clone(),
            attachments,
            timestamp: outbound.timestamp,
        });
        let (pushed, persisted) = tokio::join!(push, persist);

        let record = match persisted {
            Ok(record) => record,
            Err(e) => {
                warn!(local_id = %local_id, error = %e, "message persistence failed");
                return self.fail(local_id, &SyncError::PersistenceFailure(e), pushed);
            }
        };
        let id = record.id.clone();

        match self
            .state
            .mutate_in(&conversation_id, |core| core.store.reconcile(&local_id, record))
        {
            None => return self.discard(local_id, pushed),
            Some(Ok(ReconcileOutcome::Replaced)) => {
                info!(local_id = %local_id, id = %id, "message reconciled");
            }
            Some(Ok(ReconcileOutcome::AlreadyApplied)) => {
                debug!(local_id = %local_id, id = %id, "push echo arrived first");
            }
            Some(Err(e)) => {
                warn!(local_id = %local_id, id = %id, error = %e, "reconcile skipped");
            }
        }

        self.outbound_map().remove(&local_id);
        SendReceipt {
            local_id,
            pushed,
            outcome: SendOutcome::Sent { id },
        }
    }

    fn fail(&self, local_id: LocalId, error: &SyncError, pushed: bool) -> SendReceipt {
        let conversation_id = self
            .outbound_map()
            .get(&local_id)
            .map(|o| o.conversation.id.clone());
        let Some(conversation_id) = conversation_id else {
            return self.discard(local_id, pushed);
        };
        let reason = error.to_string();
        match self
            .state
            .mutate_in(&conversation_id, |core| core.store.mark_failed(&local_id, &reason))
        {
            None => self.discard(local_id, pushed),
            Some(result) => {
                if let Err(e) = result {
                    warn!(local_id = %local_id, error = %e, "could not mark message failed");
                }
                SendReceipt {
                    local_id,
                    pushed,
                    outcome: SendOutcome::Failed { reason },
                }
            }
        }
    }

    fn discard(&self, local_id: LocalId, pushed: bool) -> SendReceipt {
        debug!(local_id = %local_id, "conversation changed, dropping send result");
        self.outbound_map().remove(&local_id);
        SendReceipt {
            local_id,
            pushed,
            outcome: SendOutcome::Discarded,
        }
    }

    fn outbound_map(&self) -> std::sync::MutexGuard<'_, HashMap<LocalId, Outbound>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject oversized files before any placeholder exists.
///
/// # Errors
///
/// Returns [`SyncError::AttachmentTooLarge`] for the first file over the
/// per-file cap, or [`SyncError::BatchTooLarge`] when the total exceeds the
/// batch cap.
pub fn validate_uploads(uploads: &[PendingUpload], limits: &AttachmentLimits) -> Result<(), SyncError> {
    let mut total: u64 = 0;
    for upload in uploads {
        let size = upload.size_bytes();
        if size > limits.max_file_bytes {
            return Err(SyncError::AttachmentTooLarge {
                name: upload.name.clone(),
                size,
                limit: limits.max_file_bytes,
            });
        }
        total = total.saturating_add(size);
    }
    if total > limits.max_batch_bytes {
        return Err(SyncError::BatchTooLarge {
            total,
            limit: limits.max_batch_bytes,
        });
    }
    Ok(())
}
