//! Canonical, ordered, deduplicated message log for one conversation.
//!
//! The [`MessageStore`] is the single source of truth for rendering. It keeps
//! messages sorted by `(timestamp, id)` regardless of the order in which they
//! are applied, and a seen-id set that makes every authoritative insert
//! idempotent under at-least-once delivery.
//!
//! Entries without an authoritative id (own placeholders and a peer's
//! provisional push messages) are keyed by `(sender, local id)` and are
//! replaced, never duplicated, when their authoritative record arrives.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::types::{
    Attachment, Delivery, LocalId, Message, MessageId, MessageRecord, ParticipantId,
};

/// Errors produced by store mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No unsent entry carries this local id. Indicates an upstream bug.
    #[error("no placeholder with local id {0}")]
    UnknownLocalId(LocalId),

    /// The authoritative id was already applied. Expected under
    /// at-least-once delivery; callers absorb it.
    #[error("message {0} already applied")]
    DuplicateId(MessageId),

    /// A placeholder with this local id already exists.
    #[error("local id {0} already in use")]
    DuplicateLocalId(LocalId),

    /// The requested delivery state change is not allowed.
    #[error("invalid delivery transition: {from} -> {to}")]
    InvalidTransition {
        /// The current state.
        from: &'static str,
        /// The requested state.
        to: &'static str,
    },

    /// Attachments cannot change once a message is sent.
    #[error("attachments of sent message {0} are immutable")]
    AttachmentsSealed(MessageId),
}

/// Result of a successful authoritative insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new entry was added.
    Inserted,
    /// A placeholder or provisional entry with this local id was superseded.
    Replaced(LocalId),
}

/// Result of a successful [`MessageStore::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The placeholder was swapped for the authoritative record.
    Replaced,
    /// The record had already arrived (push echo); only the placeholder, if
    /// still present, was removed.
    AlreadyApplied,
}

/// Ordered, deduplicated message log.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    /// Local ids of entries added by [`MessageStore::apply_provisional`].
    provisional: HashSet<LocalId>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether an authoritative id has been applied.
    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Look up an entry by authoritative id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == Some(id))
    }

    /// Look up an entry by local id, in any state.
    pub fn get_local(&self, local_id: &LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id() == Some(local_id))
    }

    /// Idempotently insert an authoritative record.
    ///
    /// If the record echoes a local id that still has an unsent entry from
    /// the same sender, that entry is replaced. A record without that echo
    /// still replaces a provisional entry from its sender with the same
    /// timestamp. An id that was already
    /// applied only merges a `read = true` flag (monotonic) and is reported
    /// as [`StoreError::DuplicateId`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] when the id was already applied.
    pub fn apply_incoming(&mut self, record: MessageRecord) -> Result<ApplyOutcome, StoreError> {
        if self.seen.contains(&record.id) {
            if record.read {
                self.mark_read(std::slice::from_ref(&record.id));
            }
            return Err(StoreError::DuplicateId(record.id));
        }

        let by_local = record
            .local_id
            .as_ref()
            .and_then(|local| self.position_unsent(Some(&record.sender_id), local));
        let replaced = by_local
            .or_else(|| self.position_provisional_twin(&record))
            .and_then(|idx| {
                let old = self.messages.remove(idx);
                let local = old.local_id().cloned()?;
                self.provisional.remove(&local);
                Some((local, old))
            });

        let mut message = Message::from(record);
        let outcome = match replaced {
            Some((local, old)) => {
                message.read |= old.read;
                debug!(local_id = %local, id = ?message.id(), "placeholder superseded by incoming record");
                ApplyOutcome::Replaced(local)
            }
            None => ApplyOutcome::Inserted,
        };

        if let Some(id) = message.id() {
            self.seen.insert(id.clone());
        }
        self.insert_sorted(message);
        Ok(outcome)
    }

    /// Show a peer's push message before its authoritative id is known.
    ///
    /// Keyed by `(sender, local id)`; a second delivery of the same pair is
    /// ignored. Messages that already carry an id go through
    /// [`apply_incoming`](Self::apply_incoming) semantics instead.
    ///
    /// Returns `true` if a new entry was added.
    pub fn apply_provisional(&mut self, message: Message) -> bool {
        if let Some(id) = message.id() {
            if self.seen.contains(id) {
                return false;
            }
            self.seen.insert(id.clone());
            self.insert_sorted(message);
            return true;
        }

        let Some(local) = message.local_id() else {
            warn!(sender = %message.sender_id, "dropping provisional message without any key");
            return false;
        };
        if self.position_unsent(Some(&message.sender_id), local).is_some() {
            return false;
        }
        // The authoritative record may have overtaken its own push.
        let delivered = self.messages.iter().any(|m| {
            m.id().is_some()
                && m.sender_id == message.sender_id
                && m.timestamp == message.timestamp
                && m.local_id().map_or(true, |l| l == local)
        });
        if delivered {
            debug!(local_id = %local, "provisional message already delivered");
            return false;
        }
        self.provisional.insert(local.clone());
        self.insert_sorted(message);
        true
    }

    /// Insert a freshly drafted local message, moving it Composing → Pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the message is not a
    /// draft, or [`StoreError::DuplicateLocalId`] if the key is in use.
    pub fn insert_placeholder(&mut self, mut message: Message) -> Result<(), StoreError> {
        let local_id = match &message.delivery {
            Delivery::Composing { local_id } => local_id.clone(),
            other => {
                return Err(StoreError::InvalidTransition {
                    from: other.label(),
                    to: "pending",
                })
            }
        };
        if self.get_local(&local_id).is_some() {
            return Err(StoreError::DuplicateLocalId(local_id));
        }
        message.delivery = Delivery::Pending { local_id };
        self.insert_sorted(message);
        Ok(())
    }

    /// Replace the placeholder for `local_id` with its authoritative record.
    ///
    /// If the record's id was already applied (the push echo won the race),
    /// the placeholder is removed and nothing is inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLocalId`] when no placeholder exists and
    /// the record was not already applied, or
    /// [`StoreError::InvalidTransition`] when the placeholder is not pending.
    pub fn reconcile(
        &mut self,
        local_id: &LocalId,
        record: MessageRecord,
    ) -> Result<ReconcileOutcome, StoreError> {
        if self.seen.contains(&record.id) {
            if let Some(idx) = self.position_unsent(None, local_id) {
                self.messages.remove(idx);
            }
            if record.read {
                self.mark_read(std::slice::from_ref(&record.id));
            }
            debug!(local_id = %local_id, id = %record.id, "record already applied, placeholder dropped");
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let Some(idx) = self.position_unsent(None, local_id) else {
            return Err(StoreError::UnknownLocalId(local_id.clone()));
        };
        let state = self.messages[idx].delivery.label();
        if state != "pending" {
            return Err(StoreError::InvalidTransition {
                from: state,
                to: "sent",
            });
        }

        let placeholder = self.messages.remove(idx);
        let mut message = Message::from(record);
        message.read |= placeholder.read;
        if let Delivery::Sent {
            local_id: echoed, ..
        } = &mut message.delivery
        {
            if echoed.is_none() {
                *echoed = Some(local_id.clone());
            }
        }
        if let Some(id) = message.id() {
            self.seen.insert(id.clone());
        }
        self.insert_sorted(message);
        Ok(ReconcileOutcome::Replaced)
    }

    /// Move a pending placeholder to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLocalId`] or
    /// [`StoreError::InvalidTransition`].
    pub fn mark_failed(&mut self, local_id: &LocalId, reason: &str) -> Result<(), StoreError> {
        let entry = self.unsent_mut(local_id)?;
        match &entry.delivery {
            Delivery::Pending { .. } => {
                entry.delivery = Delivery::Failed {
                    local_id: local_id.clone(),
                    reason: reason.to_owned(),
                };
                Ok(())
            }
            other => Err(StoreError::InvalidTransition {
                from: other.label(),
                to: "failed",
            }),
        }
    }

    /// Move a failed placeholder back to `Pending` for an explicit retry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLocalId`] or
    /// [`StoreError::InvalidTransition`].
    pub fn mark_retrying(&mut self, local_id: &LocalId) -> Result<(), StoreError> {
        let entry = self.unsent_mut(local_id)?;
        match &entry.delivery {
            Delivery::Failed { .. } => {
                entry.delivery = Delivery::Pending {
                    local_id: local_id.clone(),
                };
                Ok(())
            }
            other => Err(StoreError::InvalidTransition {
                from: other.label(),
                to: "pending",
            }),
        }
    }

    /// Set the uploaded attachments of an unsent placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AttachmentsSealed`] once the message is sent,
    /// or [`StoreError::UnknownLocalId`].
    pub fn attach(
        &mut self,
        local_id: &LocalId,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError> {
        if let Some(Delivery::Sent { id, .. }) = self.get_local(local_id).map(|m| &m.delivery) {
            return Err(StoreError::AttachmentsSealed(id.clone()));
        }
        let entry = self.unsent_mut(local_id)?;
        entry.attachments = attachments;
        Ok(())
    }

    /// Set `read = true` on the given ids. Returns only the ids that flipped.
    pub fn mark_read(&mut self, ids: &[MessageId]) -> Vec<MessageId> {
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let mut flipped = Vec::new();
        for message in &mut self.messages {
            let Some(id) = message.id() else { continue };
            if !message.read && wanted.contains(id) {
                flipped.push(id.clone());
                message.read = true;
            }
        }
        flipped
    }

    /// Authoritative ids addressed to `self_id` that are still unread.
    pub fn unread_incoming(&self, self_id: &ParticipantId) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| &m.recipient_id == self_id && !m.is_from(self_id) && !m.read)
            .filter_map(|m| m.id().cloned())
            .collect()
    }

    fn insert_sorted(&mut self, message: Message) {
        let idx = self.messages.partition_point(|m| {
            (m.timestamp, m.order_key()) <= (message.timestamp, message.order_key())
        });
        self.messages.insert(idx, message);
    }

    /// Index of an entry without an authoritative id, keyed by local id and
    /// optionally restricted to one sender.
    fn position_unsent(&self, sender: Option<&ParticipantId>, local_id: &LocalId) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.id().is_none()
                && m.local_id() == Some(local_id)
                && sender.map_or(true, |s| &m.sender_id == s)
        })
    }

    /// Index of a provisional entry that `record` delivers even though the
    /// record does not echo its local id: same sender, same timestamp.
    fn position_provisional_twin(&self, record: &MessageRecord) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.id().is_none()
                && m.sender_id == record.sender_id
                && m.timestamp == record.timestamp
                && m.local_id().is_some_and(|l| self.provisional.contains(l))
        })
    }

    fn unsent_mut(&mut self, local_id: &LocalId) -> Result<&mut Message, StoreError> {
        let idx = self
            .position_unsent(None, local_id)
            .ok_or_else(|| StoreError::UnknownLocalId(local_id.clone()))?;
        Ok(&mut self.messages[idx])
    }
}
