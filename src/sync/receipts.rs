//! Read receipts: batched mark-as-read with an in-flight guard, and
//! monotonic merging of remote receipts.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::state::SharedState;
use super::SyncError;
use crate::backend::ChatBackend;
use crate::transport::{PushEvent, PushTransport};
use crate::types::{Conversation, MessageId, ReadReceiptEvent};

/// Result of a read trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing addressed to us is unread.
    NothingUnread,
    /// A mark-as-read call for this conversation is already running.
    AlreadyInFlight,
    /// The ids were flagged read locally.
    Marked {
        /// Ids sent to the backend.
        ids: Vec<MessageId>,
        /// Whether the backend accepted them.
        persisted: bool,
        /// Whether a `read` push event went out.
        broadcast: bool,
    },
    /// The conversation changed before the call completed.
    Discarded,
}

enum Claim {
    Nothing,
    Busy,
    Granted(Conversation, Vec<MessageId>, u64),
}

/// Issues and merges read receipts for the active conversation.
pub struct ReadReceiptTracker {
    state: Arc<SharedState>,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn PushTransport>,
}

impl ReadReceiptTracker {
    /// Create a tracker over the given collaborators.
    pub fn new(
        state: Arc<SharedState>,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            state,
            backend,
            transport,
        }
    }

    /// The viewport reached the newest message: mark everything unread as
    /// read, unless a call is already in flight for this conversation.
    ///
    /// Ids whose earlier persistence failed are sent again.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveConversation`] when nothing is open.
    pub async fn on_viewport_at_bottom(&self) -> Result<ReadOutcome, SyncError> {
        let claim = self.state.with_core(|core| -> Result<Claim, SyncError> {
            let conversation = core
                .conversation
                .clone()
                .ok_or(SyncError::NoActiveConversation)?;
            let unread = core.reads_to_send();
            if unread.is_empty() {
                return Ok(Claim::Nothing);
            }
            Ok(match core.claim_read(&conversation.id) {
                Some(token) => Claim::Granted(conversation, unread, token),
                None => Claim::Busy,
            })
        })?;

        let (conversation, unread, token) = match claim {
            Claim::Nothing => return Ok(ReadOutcome::NothingUnread),
            Claim::Busy => {
                debug!("mark-as-read already in flight");
                return Ok(ReadOutcome::AlreadyInFlight);
            }
            Claim::Granted(conversation, unread, token) => (conversation, unread, token),
        };

        let outcome = self.mark_in(&conversation, unread).await;
        self.state
            .with_core(|core| core.release_read(&conversation.id, token));
        Ok(outcome)
    }

    /// Mark specific ids of the active conversation as read.
    ///
    /// The local flag flips before the network call and stays set if the
    /// call fails; the ids are then resent by the next
    /// [`on_viewport_at_bottom`](Self::on_viewport_at_bottom).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveConversation`] when nothing is open.
    pub async fn mark_as_read(&self, ids: Vec<MessageId>) -> Result<ReadOutcome, SyncError> {
        let conversation = self
            .state
            .active_conversation()
            .ok_or(SyncError::NoActiveConversation)?;
        Ok(self.mark_in(&conversation, ids).await)
    }

    /// Merge a receipt from the push channel. Returns how many messages
    /// flipped to read; repeated receipts flip nothing and publish no
    /// snapshot.
    ///
    /// Only messages addressed to the reader are affected. A receipt issued
    /// by the local participant (another device) also releases the
    /// in-flight guard for its conversation.
    pub fn on_remote_read_receipt(&self, event: &ReadReceiptEvent) -> usize {
        let self_id = self.state.self_id().clone();
        let flipped = self.state.with_core(|core| {
            if !core.is_active(&event.conversation_id) {
                return None;
            }
            if event.reader_id == self_id {
                core.reads_in_flight.remove(&event.conversation_id);
                core.settle_reads(&event.message_ids);
            }
            let ids: Vec<MessageId> = event
                .message_ids
                .iter()
                .filter(|id| {
                    core.store
                        .get(id)
                        .is_some_and(|m| m.recipient_id == event.reader_id)
                })
                .cloned()
                .collect();
            Some(core.store.mark_read(&ids))
        });

        match flipped {
            None => {
                debug!(conversation = %event.conversation_id, "receipt for inactive conversation ignored");
                0
            }
            Some(ids) if ids.is_empty() => 0,
            Some(ids) => {
                self.state.publish();
                debug!(count = ids.len(), reader = %event.reader_id, "remote receipt applied");
                ids.len()
            }
        }
    }

    async fn mark_in(&self, conversation: &Conversation, ids: Vec<MessageId>) -> ReadOutcome {
        if ids.is_empty() {
            return ReadOutcome::NothingUnread;
        }
        if self
            .state
            .mutate_in(&conversation.id, |core| core.store.mark_read(&ids))
            .is_none()
        {
            return ReadOutcome::Discarded;
        }

        if let Err(e) = self.backend.mark_as_read(&conversation.id, &ids).await {
            warn!(
                conversation = %conversation.id,
                count = ids.len(),
                error = %e,
                "mark-as-read failed, keeping local flag"
            );
            self.state.with_core(|core| {
                if core.is_active(&conversation.id) {
                    core.defer_reads(&ids);
                }
            });
            return ReadOutcome::Marked {
                ids,
                persisted: false,
                broadcast: false,
            };
        }
        self.state.with_core(|core| {
            if core.is_active(&conversation.id) {
                core.settle_reads(&ids);
            }
        });
        info!(conversation = %conversation.id, count = ids.len(), "messages marked read");

        let broadcast = if self.state.connection().is_connected() {
            let event = PushEvent::Read(ReadReceiptEvent {
                conversation_id: conversation.id.clone(),
                message_ids: ids.clone(),
                reader_id: conversation.self_id.clone(),
            });
            match self.transport.emit(event).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "read receipt broadcast failed");
                    false
                }
            }
        } else {
            false
        };

        ReadOutcome::Marked {
            ids,
            persisted: true,
            broadcast,
        }
    }
}
