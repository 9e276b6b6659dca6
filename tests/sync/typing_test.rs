//! Tests for typing presence: debounce timing under a paused clock and
//! remote typing state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatsync::sync::typing::{DebounceTimer, TypingSignaler};

use crate::support::{client, coach, Fixture, ScriptedBackend};

const IDLE: Duration = Duration::from_millis(2000);

fn signaler(fx: &Fixture) -> TypingSignaler {
    TypingSignaler::new(Arc::clone(&fx.state), fx.transport.clone(), IDLE)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn bursts_emit_one_true_then_one_false_after_the_window() {
    let fx = Fixture::new(ScriptedBackend::new());
    fx.state.connection().on_connect();
    let typing = signaler(&fx);

    // Keystrokes at t = 0, 500 and 900 ms.
    typing.on_local_input_change(true).await;
    assert_eq!(fx.transport.typing_flags(), vec![true]);
    sleep_ms(500).await;
    typing.on_local_input_change(true).await;
    sleep_ms(400).await;
    typing.on_local_input_change(true).await;
    assert_eq!(fx.transport.typing_flags(), vec![true]);

    // t = 2899: the window measured from the last keystroke has not elapsed.
    sleep_ms(1999).await;
    assert_eq!(fx.transport.typing_flags(), vec![true]);
    assert!(typing.is_signaling());

    // t = 2901: exactly one false went out at 2900.
    sleep_ms(2).await;
    assert_eq!(fx.transport.typing_flags(), vec![true, false]);
    assert!(!typing.is_signaling());

    // Nothing trails later.
    sleep_ms(5000).await;
    assert_eq!(fx.transport.typing_flags(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn emptied_input_withdraws_immediately_and_only_once() {
    let fx = Fixture::new(ScriptedBackend::new());
    fx.state.connection().on_connect();
    let typing = signaler(&fx);

    typing.on_local_input_change(true).await;
    sleep_ms(300).await;
    typing.on_local_input_change(false).await;
    assert_eq!(fx.transport.typing_flags(), vec![true, false]);

    // The disarmed timer never fires a duplicate false.
    typing.on_local_input_change(false).await;
    sleep_ms(5000).await;
    assert_eq!(fx.transport.typing_flags(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn typing_again_after_the_window_emits_a_new_true() {
    let fx = Fixture::new(ScriptedBackend::new());
    fx.state.connection().on_connect();
    let typing = signaler(&fx);

    typing.on_local_input_change(true).await;
    sleep_ms(2500).await;
    typing.on_local_input_change(true).await;
    assert_eq!(fx.transport.typing_flags(), vec![true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_emitted_while_disconnected() {
    let fx = Fixture::new(ScriptedBackend::new());
    let typing = signaler(&fx);

    typing.on_local_input_change(true).await;
    sleep_ms(3000).await;
    assert!(fx.transport.events().is_empty());
    assert!(!typing.is_signaling());
}

#[tokio::test]
async fn remote_typing_is_stored_per_peer_and_self_echo_ignored() {
    let fx = Fixture::new(ScriptedBackend::new());
    let typing = signaler(&fx);

    typing.on_remote_typing_event(client(), true);
    let peer = fx.state.snapshot().peer_typing;
    assert!(peer.is_some_and(|t| t.is_typing && t.participant_id == client()));

    typing.on_remote_typing_event(coach(), true);
    typing.on_remote_typing_event(client(), false);
    let peer = fx.state.snapshot().peer_typing;
    assert!(peer.is_some_and(|t| !t.is_typing));
}

#[tokio::test(start_paused = true)]
async fn rearming_the_timer_cancels_the_previous_fire() {
    let fired: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let mut timer = DebounceTimer::new();

    for _ in 0..3 {
        let fired = Arc::clone(&fired);
        timer.arm(Duration::from_millis(100), move |generation| async move {
            if let Ok(mut fired) = fired.lock() {
                fired.push(generation);
            }
        });
        sleep_ms(50).await;
    }
    assert!(timer.is_armed());
    sleep_ms(200).await;

    let fired = match fired.lock() {
        Ok(fired) => fired.clone(),
        Err(err) => panic!("lock should not be poisoned: {err}"),
    };
    assert_eq!(fired.len(), 1);
    assert!(timer.is_current(fired[0]));
}

#[tokio::test(start_paused = true)]
async fn disarmed_timer_never_fires() {
    let count = Arc::new(AtomicU64::new(0));
    let mut timer = DebounceTimer::new();
    let counter = Arc::clone(&count);
    timer.arm(Duration::from_millis(100), move |_| async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    timer.disarm();
    assert!(!timer.is_armed());

    sleep_ms(500).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
