//! Chat session facade.
//!
//! [`ChatSession`] wires the sync components to one [`SharedState`] and is
//! the only type a UI needs: it opens conversations, forwards user input,
//! routes inbound push events and exposes snapshots.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::config::Config;
use crate::store::{MessageStore, StoreError};
use crate::sync::receipts::{ReadOutcome, ReadReceiptTracker};
use crate::sync::sender::{OptimisticSender, SendReceipt};
use crate::sync::state::{ChatSnapshot, SharedState};
use crate::sync::typing::TypingSignaler;
use crate::sync::SyncError;
use crate::transport::{PushEvent, PushMessage, PushTransport};
use crate::types::{
    Conversation, ConversationId, LocalId, MessageId, MessageRecord, ParticipantId, PendingUpload,
};

/// One participant's view of the chat.
pub struct ChatSession {
    state: Arc<SharedState>,
    backend: Arc<dyn ChatBackend>,
    sender: OptimisticSender,
    receipts: ReadReceiptTracker,
    typing: TypingSignaler,
}

impl ChatSession {
    /// Build a session for `config.identity.self_id`.
    pub fn new(
        config: &Config,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let state = Arc::new(SharedState::new(ParticipantId::new(
            config.identity.self_id.clone(),
        )));
        let sender = OptimisticSender::new(
            Arc::clone(&state),
            Arc::clone(&backend),
            Arc::clone(&transport),
            config.attachments.clone(),
        );
        let receipts =
            ReadReceiptTracker::new(Arc::clone(&state), Arc::clone(&backend), Arc::clone(&transport));
        let typing = TypingSignaler::new(Arc::clone(&state), transport, config.sync.typing_idle());
        Self {
            state,
            backend,
            sender,
            receipts,
            typing,
        }
    }

    /// Make a conversation with `peer_id` active and load its history.
    ///
    /// The view is cleared before the fetch. Returns how many messages the
    /// history added; `0` if another conversation was opened meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PersistenceFailure`] if the history fetch fails.
    /// The conversation stays active with an empty view.
    pub async fn open(
        &self,
        conversation_id: ConversationId,
        peer_id: ParticipantId,
    ) -> Result<usize, SyncError> {
        self.typing.on_local_input_change(false).await;
        let conversation =
            Conversation::new(conversation_id, self.state.self_id().clone(), peer_id);
        info!(conversation = %conversation.id, peer = %conversation.peer_id, "opening conversation");
        self.state.activate(conversation.clone());
        self.sender.forget_inactive();
        self.load_history(&conversation.id).await
    }

    /// Refetch history of the active conversation and merge it in.
    ///
    /// Already-known ids only merge their read flag; unsent local entries
    /// echoed by the history are superseded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveConversation`] or
    /// [`SyncError::PersistenceFailure`].
    pub async fn refresh_history(&self) -> Result<usize, SyncError> {
        let conversation = self
            .state
            .active_conversation()
            .ok_or(SyncError::NoActiveConversation)?;
        self.load_history(&conversation.id).await
    }

    /// Send a message. See [`OptimisticSender::submit`].
    ///
    /// # Errors
    ///
    /// Propagates the up-front rejections of [`OptimisticSender::submit`].
    pub async fn submit(
        &self,
        content: Option<String>,
        uploads: Vec<PendingUpload>,
    ) -> Result<SendReceipt, SyncError> {
        self.sender.submit(content, uploads).await
    }

    /// Retry a failed message. See [`OptimisticSender::retry`].
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`OptimisticSender::retry`].
    pub async fn retry(&self, local_id: &LocalId) -> Result<SendReceipt, SyncError> {
        self.sender.retry(local_id).await
    }

    /// The newest message scrolled into view.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveConversation`] when nothing is open.
    pub async fn on_viewport_at_bottom(&self) -> Result<ReadOutcome, SyncError> {
        self.receipts.on_viewport_at_bottom().await
    }

    /// Mark specific ids as read.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveConversation`] when nothing is open.
    pub async fn mark_as_read(&self, ids: Vec<MessageId>) -> Result<ReadOutcome, SyncError> {
        self.receipts.mark_as_read(ids).await
    }

    /// The composer text changed.
    pub async fn on_local_input_change(&self, text: &str) {
        self.typing.on_local_input_change(!text.is_empty()).await;
    }

    /// Route an inbound push event. Returns whether it changed the view.
    pub fn handle_push(&self, event: PushEvent) -> bool {
        debug!(event = event.name(), "push event received");
        match event {
            PushEvent::Message(message) => self.apply_push_message(message),
            PushEvent::Typing {
                sender_id,
                is_typing,
            } => {
                if &sender_id == self.state.self_id() {
                    return false;
                }
                self.typing.on_remote_typing_event(sender_id, is_typing);
                true
            }
            PushEvent::Read(receipt) => self.receipts.on_remote_read_receipt(&receipt) > 0,
        }
    }

    /// Decode and route a raw JSON push event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PushDecode`] for malformed payloads; the state
    /// is left untouched.
    pub fn handle_push_json(&self, raw: &str) -> Result<bool, SyncError> {
        let event = PushEvent::from_json(raw).map_err(|e| {
            warn!(error = %e, "dropping malformed push event");
            e
        })?;
        Ok(self.handle_push(event))
    }

    /// The push transport (re)connected.
    ///
    /// On a real transition the active conversation's history is refetched,
    /// since pushes sent while offline are never replayed.
    pub async fn on_transport_connected(&self) {
        if !self.state.connection().on_connect() {
            return;
        }
        self.state.publish();
        if self.state.active_conversation().is_none() {
            return;
        }
        match self.refresh_history().await {
            Ok(added) => info!(added, "history refetched after reconnect"),
            Err(e) => warn!(error = %e, "history refetch after reconnect failed"),
        }
    }

    /// The push transport dropped.
    pub fn on_transport_disconnected(&self) {
        if self.state.connection().on_disconnect() {
            self.state.publish();
        }
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.snapshot()
    }

    /// Watch receiver of snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.subscribe()
    }

    /// Snapshots as a stream, starting with the current one.
    pub fn updates(&self) -> WatchStream<ChatSnapshot> {
        WatchStream::new(self.state.subscribe())
    }

    /// Shared state, for hosts that need direct read access.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Sends that have not settled as `Sent`.
    pub fn unsettled_sends(&self) -> usize {
        self.sender.unsettled()
    }

    async fn load_history(&self, conversation_id: &ConversationId) -> Result<usize, SyncError> {
        let records = self
            .backend
            .fetch_history(conversation_id)
            .await
            .map_err(|e| {
                warn!(conversation = %conversation_id, error = %e, "history fetch failed");
                SyncError::PersistenceFailure(e)
            })?;
        let fetched = records.len();

        let added = self
            .state
            .mutate_in(conversation_id, |core| apply_records(&mut core.store, records));
        match added {
            Some(added) => {
                debug!(conversation = %conversation_id, fetched, added, "history applied");
                Ok(added)
            }
            None => {
                debug!(conversation = %conversation_id, "conversation changed, dropping history");
                Ok(0)
            }
        }
    }

    fn apply_push_message(&self, message: PushMessage) -> bool {
        let conversation_id = message.conversation_id.clone();
        let changed = self.state.mutate_in(&conversation_id, |core| {
            match message.into_record() {
                Ok(record) => apply_records(&mut core.store, vec![record]) > 0,
                Err(message) => match message.into_provisional() {
                    Some(provisional) => core.store.apply_provisional(provisional),
                    None => false,
                },
            }
        });
        if changed.is_none() {
            debug!(conversation = %conversation_id, "push message for inactive conversation ignored");
        }
        changed.unwrap_or(false)
    }
}

/// Apply authoritative records, absorbing duplicates. Returns how many were
/// new.
fn apply_records(store: &mut MessageStore, records: Vec<MessageRecord>) -> usize {
    let mut added: usize = 0;
    for record in records {
        match store.apply_incoming(record) {
            Ok(_) => added = added.saturating_add(1),
            Err(StoreError::DuplicateId(_)) => {}
            Err(e) => warn!(error = %e, "record rejected by store"),
        }
    }
    added
}
