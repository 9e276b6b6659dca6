//! Tests for the seen marker.

use chatsync::sync::seen::seen_marker;
use chatsync::types::{Message, MessageId};

use crate::support::{coach, from_client, from_coach};

fn message(record: chatsync::types::MessageRecord, read: bool) -> Message {
    let mut message = Message::from(record);
    message.read = read;
    message
}

#[test]
fn picks_latest_read_message_authored_by_self() {
    let messages = vec![
        message(from_coach("m1", 1), true),
        message(from_coach("m2", 2), true),
        message(from_coach("m3", 3), false),
        message(from_client("m4", 4), true),
    ];
    let marker = seen_marker(&messages, &coach());
    assert_eq!(marker.and_then(Message::id), Some(&MessageId::new("m2")));
}

#[test]
fn none_when_peer_has_read_nothing() {
    let messages = vec![
        message(from_coach("m1", 1), false),
        message(from_client("m2", 2), true),
    ];
    assert!(seen_marker(&messages, &coach()).is_none());
    assert!(seen_marker(&[], &coach()).is_none());
}

#[test]
fn uses_timestamp_not_position() {
    // Out of display order on purpose: the marker follows timestamps.
    let messages = vec![
        message(from_coach("late", 9), true),
        message(from_coach("early", 1), true),
    ];
    let marker = seen_marker(&messages, &coach());
    assert_eq!(marker.and_then(Message::id), Some(&MessageId::new("late")));
}
