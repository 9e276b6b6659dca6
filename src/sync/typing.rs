//! Typing presence: local debounce and remote state.
//!
//! Locally, the first keystroke emits `is_typing = true` immediately and
//! arms an inactivity timer; every further change re-arms it. The timer
//! firing, or the input becoming empty, emits a single `is_typing = false`.
//!
//! Remotely, the last received flag per participant is stored as-is. There
//! is no receive-side expiry: a peer that disconnects mid-type stays shown
//! as typing until its next event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::state::SharedState;
use crate::transport::{PushEvent, PushTransport};
use crate::types::{ParticipantId, TypingState};

/// A cancellable one-shot timer.
///
/// Each [`arm`](Self::arm) aborts the previous task and bumps a generation
/// counter. The fired callback receives the generation it was armed with
/// and must check [`is_current`](Self::is_current) under the owner's lock,
/// since an abort cannot stop a callback that is already running.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm the timer to run `on_fire(generation)` after `delay`.
    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.abort();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        // Deadline is fixed now, not when the task is first polled.
        let deadline = Instant::now().checked_add(delay);
        self.handle = Some(tokio::spawn(async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => tokio::time::sleep(delay).await,
            }
            on_fire(generation).await;
        }));
    }

    /// Cancel a pending fire.
    pub fn disarm(&mut self) {
        self.abort();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Whether a fire carrying `generation` is still the latest arm.
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    /// Whether the timer is armed.
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Forget the handle of a timer that has fired.
    fn settle(&mut self) {
        self.handle = None;
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Last typing flag received per participant.
#[derive(Debug, Default, Clone)]
pub struct RemoteTyping {
    states: HashMap<ParticipantId, TypingState>,
}

impl RemoteTyping {
    /// Record a typing event.
    pub fn apply(&mut self, participant_id: ParticipantId, is_typing: bool) {
        self.states.insert(
            participant_id.clone(),
            TypingState {
                participant_id,
                is_typing,
                last_updated: Utc::now(),
            },
        );
    }

    /// Current state for a participant.
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&TypingState> {
        self.states.get(participant_id)
    }
}

#[derive(Debug, Default)]
struct LocalTyping {
    signaling: bool,
    timer: DebounceTimer,
}

/// Emits typing transitions over the push channel when connected.
#[derive(Clone)]
struct TypingEmitter {
    state: Arc<SharedState>,
    transport: Arc<dyn PushTransport>,
}

impl TypingEmitter {
    async fn emit(&self, is_typing: bool) {
        if !self.state.connection().is_connected() {
            debug!(is_typing, "typing emit skipped: transport disconnected");
            return;
        }
        let event = PushEvent::Typing {
            sender_id: self.state.self_id().clone(),
            is_typing,
        };
        if let Err(e) = self.transport.emit(event).await {
            warn!(error = %e, is_typing, "typing emit failed");
        }
    }
}

/// Debounces local typing transitions and stores remote typing state.
pub struct TypingSignaler {
    emitter: TypingEmitter,
    idle: Duration,
    local: Arc<Mutex<LocalTyping>>,
}

impl TypingSignaler {
    /// Create a signaler that withdraws the typing flag after `idle`.
    pub fn new(state: Arc<SharedState>, transport: Arc<dyn PushTransport>, idle: Duration) -> Self {
        Self {
            emitter: TypingEmitter { state, transport },
            idle,
            local: Arc::new(Mutex::new(LocalTyping::default())),
        }
    }

    /// Whether a local `is_typing = true` is currently in effect.
    pub fn is_signaling(&self) -> bool {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signaling
    }

    /// React to the composer content changing.
    ///
    /// Must be called from within a tokio runtime (the idle timer is a task).
    pub async fn on_local_input_change(&self, has_content: bool) {
        let emit = {
            let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
            if has_content {
                let leading = !local.signaling;
                local.signaling = true;
                let shared = Arc::clone(&self.local);
                let emitter = self.emitter.clone();
                local.timer.arm(self.idle, move |generation| async move {
                    let fire = {
                        let mut local = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        if local.signaling && local.timer.is_current(generation) {
                            local.signaling = false;
                            local.timer.settle();
                            true
                        } else {
                            false
                        }
                    };
                    if fire {
                        debug!("typing idle window elapsed");
                        emitter.emit(false).await;
                    }
                });
                leading.then_some(true)
            } else if local.signaling {
                local.signaling = false;
                local.timer.disarm();
                Some(false)
            } else {
                None
            }
        };

        if let Some(is_typing) = emit {
            self.emitter.emit(is_typing).await;
        }
    }

    /// Store a typing event received from the push channel.
    ///
    /// Events echoing the local participant are ignored.
    pub fn on_remote_typing_event(&self, participant_id: ParticipantId, is_typing: bool) {
        let state = &self.emitter.state;
        if &participant_id == state.self_id() {
            return;
        }
        state.mutate(|core| core.remote_typing.apply(participant_id, is_typing));
    }
}
