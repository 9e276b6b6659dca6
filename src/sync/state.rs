//! Shared mutable state and snapshot publication.
//!
//! [`SharedState`] owns the message store, remote typing map and read
//! guards behind one [`Mutex`], and publishes an immutable [`ChatSnapshot`]
//! through a `tokio::sync::watch` channel after every mutation.
//!
//! Uses a sync [`Mutex`] since no critical section awaits.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use super::seen::seen_marker;
use super::typing::RemoteTyping;
use crate::connection::ConnectionMonitor;
use crate::store::MessageStore;
use crate::types::{Conversation, ConversationId, Message, MessageId, ParticipantId, TypingState};

/// Immutable view handed to the UI after each mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    /// Active conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Messages in display order.
    pub messages: Vec<Message>,
    /// The peer's typing state, if one was ever received.
    pub peer_typing: Option<TypingState>,
    /// Whether the push transport is connected.
    pub connected: bool,
    /// Latest self-authored message the peer has read.
    pub seen_marker: Option<MessageId>,
}

/// Everything guarded by the shared mutex.
#[derive(Debug, Default)]
pub struct CoreState {
    pub(crate) conversation: Option<Conversation>,
    pub(crate) store: MessageStore,
    pub(crate) remote_typing: RemoteTyping,
    /// Conversation -> token of the mark-as-read call currently in flight.
    pub(crate) reads_in_flight: HashMap<ConversationId, u64>,
    pub(crate) next_read_token: u64,
    /// Ids flagged read locally whose persistence failed.
    pub(crate) unpersisted_reads: Vec<MessageId>,
}

impl CoreState {
    /// The active conversation.
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// The message store of the active conversation.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Mutable access to the store, for hosts applying records directly.
    pub fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }

    /// Whether `conversation_id` is the active conversation.
    pub fn is_active(&self, conversation_id: &ConversationId) -> bool {
        self.conversation
            .as_ref()
            .is_some_and(|c| &c.id == conversation_id)
    }

    /// Whether a mark-as-read call is in flight for `conversation_id`.
    pub fn read_in_flight(&self, conversation_id: &ConversationId) -> bool {
        self.reads_in_flight.contains_key(conversation_id)
    }

    fn activate(&mut self, conversation: Conversation) {
        self.store = MessageStore::new();
        self.remote_typing = RemoteTyping::default();
        self.unpersisted_reads.clear();
        self.conversation = Some(conversation);
    }

    /// Ids a mark-as-read trigger should send: unread incoming messages plus
    /// earlier reads the backend never acknowledged.
    pub fn reads_to_send(&self) -> Vec<MessageId> {
        let Some(conversation) = &self.conversation else {
            return Vec::new();
        };
        let mut ids = self.unpersisted_reads.clone();
        for id in self.store.unread_incoming(&conversation.self_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Remember ids whose persistence failed, for the next trigger.
    pub(crate) fn defer_reads(&mut self, ids: &[MessageId]) {
        for id in ids {
            if !self.unpersisted_reads.contains(id) {
                self.unpersisted_reads.push(id.clone());
            }
        }
    }

    /// Forget ids the backend acknowledged.
    pub(crate) fn settle_reads(&mut self, ids: &[MessageId]) {
        self.unpersisted_reads.retain(|id| !ids.contains(id));
    }

    /// Claim the read guard for a conversation, returning its token.
    pub(crate) fn claim_read(&mut self, conversation_id: &ConversationId) -> Option<u64> {
        if self.reads_in_flight.contains_key(conversation_id) {
            return None;
        }
        self.next_read_token = self.next_read_token.wrapping_add(1);
        self.reads_in_flight
            .insert(conversation_id.clone(), self.next_read_token);
        Some(self.next_read_token)
    }

    /// Release the read guard if `token` still owns it.
    pub(crate) fn release_read(&mut self, conversation_id: &ConversationId, token: u64) {
        if self.reads_in_flight.get(conversation_id) == Some(&token) {
            self.reads_in_flight.remove(conversation_id);
        }
    }

    fn snapshot(&self, self_id: &ParticipantId, connected: bool) -> ChatSnapshot {
        let messages = self.store.messages();
        ChatSnapshot {
            conversation_id: self.conversation.as_ref().map(|c| c.id.clone()),
            messages: messages.to_vec(),
            peer_typing: self
                .conversation
                .as_ref()
                .and_then(|c| self.remote_typing.get(&c.peer_id))
                .cloned(),
            connected,
            seen_marker: seen_marker(messages, self_id).and_then(|m| m.id().cloned()),
        }
    }
}

/// State shared by every sync component of one session.
#[derive(Debug)]
pub struct SharedState {
    self_id: ParticipantId,
    core: Mutex<CoreState>,
    connection: ConnectionMonitor,
    snapshots: watch::Sender<ChatSnapshot>,
}

impl SharedState {
    /// Create empty state for the local participant `self_id`.
    pub fn new(self_id: ParticipantId) -> Self {
        let (snapshots, _) = watch::channel(ChatSnapshot::default());
        Self {
            self_id,
            core: Mutex::new(CoreState::default()),
            connection: ConnectionMonitor::new(),
            snapshots,
        }
    }

    /// The local participant.
    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    /// Push transport connection state.
    pub fn connection(&self) -> &ConnectionMonitor {
        &self.connection
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.subscribe()
    }

    /// The active conversation, if any.
    pub fn active_conversation(&self) -> Option<Conversation> {
        self.lock().conversation.clone()
    }

    /// Make `conversation` active with an empty view and publish it.
    ///
    /// Completions issued for the previous conversation are dropped from
    /// here on.
    pub fn activate(&self, conversation: Conversation) {
        self.mutate(|core| core.activate(conversation));
    }

    /// Run `f` with read access. Nothing is published.
    pub fn read<R>(&self, f: impl FnOnce(&CoreState) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with write access without publishing a snapshot.
    ///
    /// For bookkeeping that is invisible to the UI (read guards).
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Run `f` with write access, then publish a snapshot.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let mut core = self.lock();
        let result = f(&mut core);
        self.publish_locked(&core);
        result
    }

    /// Like [`mutate`](Self::mutate), but only if `conversation_id` is still
    /// active. Returns `None` (and publishes nothing) for stale completions.
    pub fn mutate_in<R>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut CoreState) -> R,
    ) -> Option<R> {
        let mut core = self.lock();
        if !core.is_active(conversation_id) {
            return None;
        }
        let result = f(&mut core);
        self.publish_locked(&core);
        Some(result)
    }

    /// Publish a snapshot of the current state.
    pub fn publish(&self) {
        let core = self.lock();
        self.publish_locked(&core);
    }

    fn publish_locked(&self, core: &CoreState) {
        let snapshot = core.snapshot(&self.self_id, self.connection.is_connected());
        self.snapshots.send_replace(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
