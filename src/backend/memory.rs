//! In-process persistence backend.
//!
//! Assigns sequential ids (`msg-1`, `msg-2`, ...) and keeps records in a
//! map keyed by conversation. Used by the `replay` command and by tests
//! that need a backend with real create/read semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{BackendError, ChatBackend};
use crate::types::{
    Attachment, ConversationId, MessageId, MessageRecord, NewMessage, PendingUpload,
};

/// In-memory [`ChatBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<ConversationId, Vec<MessageRecord>>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation with existing records.
    pub fn seed(&self, records: Vec<MessageRecord>) {
        if let Ok(mut map) = self.records.lock() {
            for record in records {
                map.entry(record.conversation_id.clone())
                    .or_default()
                    .push(record);
            }
        }
    }

    /// Make every call fail with [`BackendError::Unavailable`] while `true`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Snapshot of the stored records for a conversation.
    pub fn records(&self, conversation_id: &ConversationId) -> Vec<MessageRecord> {
        match self.records.lock() {
            Ok(map) => map.get(conversation_id).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn ensure_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("memory backend offline".to_owned()));
        }
        Ok(())
    }

    fn mint_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        self.ensure_online()?;
        Ok(self.records(conversation_id))
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, BackendError> {
        self.ensure_online()?;
        let mut map = self
            .records
            .lock()
            .map_err(|e| BackendError::Unavailable(format!("lock poisoned: {e}")))?;
        let records = map.entry(message.conversation_id.clone()).or_default();

        // Creates are idempotent on the client reference.
        if let Some(existing) = records
            .iter()
            .find(|r| r.local_id.as_ref() == Some(&message.local_id))
        {
            return Ok(existing.clone());
        }

        let record = MessageRecord {
            id: MessageId::new(format!("msg-{}", self.mint_id())),
            local_id: Some(message.local_id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content,
            attachments: message.attachments,
            timestamp: Utc::now(),
            read: false,
        };
        debug!(id = %record.id, "memory backend stored message");
        records.push(record.clone());
        Ok(record)
    }

    async fn mark_as_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), BackendError> {
        self.ensure_online()?;
        let mut map = self
            .records
            .lock()
            .map_err(|e| BackendError::Unavailable(format!("lock poisoned: {e}")))?;
        let records = map
            .get_mut(conversation_id)
            .ok_or_else(|| BackendError::NotFound(conversation_id.to_string()))?;
        for record in records.iter_mut() {
            if message_ids.contains(&record.id) {
                record.read = true;
            }
        }
        Ok(())
    }

    async fn upload_attachments(
        &self,
        conversation_id: &ConversationId,
        uploads: &[PendingUpload],
    ) -> Result<Vec<Attachment>, BackendError> {
        self.ensure_online()?;
        Ok(uploads
            .iter()
            .map(|upload| Attachment {
                path: format!("uploads/{conversation_id}/{}-{}", self.mint_id(), upload.name),
                media_type: upload.media_type,
            })
            .collect())
    }
}
