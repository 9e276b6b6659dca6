//! Tests for the message store: idempotent apply, ordering, reconciliation
//! and delivery transitions.

use chatsync::store::{ApplyOutcome, MessageStore, ReconcileOutcome, StoreError};
use chatsync::types::{
    Attachment, Delivery, LocalId, MediaType, Message, MessageId, MessageRecord,
};

use crate::support::{at, client, coach, conversation_id, from_client, from_coach};

fn draft(local_id: &LocalId, secs: i64) -> Message {
    Message::draft(
        local_id.clone(),
        conversation_id(),
        coach(),
        client(),
        Some("placeholder".to_owned()),
        at(secs),
    )
}

fn echo(id: &str, local_id: &LocalId, secs: i64) -> MessageRecord {
    MessageRecord {
        local_id: Some(local_id.clone()),
        ..from_coach(id, secs)
    }
}

fn order(store: &MessageStore) -> Vec<String> {
    store
        .messages()
        .iter()
        .map(|m| m.order_key().to_owned())
        .collect()
}

#[test]
fn applying_the_same_record_twice_keeps_one_entry() {
    let mut store = MessageStore::new();
    assert_eq!(
        store.apply_incoming(from_client("m1", 1)),
        Ok(ApplyOutcome::Inserted)
    );
    assert_eq!(
        store.apply_incoming(from_client("m1", 1)),
        Err(StoreError::DuplicateId(MessageId::new("m1")))
    );
    assert_eq!(store.len(), 1);
    assert!(store.contains_id(&MessageId::new("m1")));
}

#[test]
fn read_flag_never_regresses() {
    let mut store = MessageStore::new();
    assert!(store.apply_incoming(from_client("m1", 1)).is_ok());

    let read_copy = MessageRecord {
        read: true,
        ..from_client("m1", 1)
    };
    assert!(store.apply_incoming(read_copy).is_err());
    assert!(store.get(&MessageId::new("m1")).is_some_and(|m| m.read));

    // A stale unread copy arriving later changes nothing.
    assert!(store.apply_incoming(from_client("m1", 1)).is_err());
    assert!(store.get(&MessageId::new("m1")).is_some_and(|m| m.read));

    assert!(store.mark_read(&[MessageId::new("m1")]).is_empty());
}

/// Every ordering of `0..n`, built by inserting each index at every
/// position of the orderings of the indices before it.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut all: Vec<Vec<usize>> = vec![Vec::new()];
    for item in 0..n {
        let mut next = Vec::new();
        for partial in &all {
            for pos in 0..=partial.len() {
                let mut grown = partial.clone();
                grown.insert(pos, item);
                next.push(grown);
            }
        }
        all = next;
    }
    all
}

#[test]
fn order_is_independent_of_arrival_order() {
    let records = [
        from_client("m1", 1),
        from_coach("m2", 2),
        from_client("m3", 2),
        from_coach("m4", 5),
        from_client("m5", 3),
    ];
    let permutations = permutations(records.len());
    assert_eq!(permutations.len(), 120);

    let mut orders = Vec::new();
    for permutation in permutations {
        let mut store = MessageStore::new();
        for idx in permutation {
            assert!(store.apply_incoming(records[idx].clone()).is_ok());
            // Duplicates interleaved with fresh deliveries are absorbed.
            assert!(store.apply_incoming(records[idx].clone()).is_err());
        }
        orders.push(order(&store));
    }

    let expected: Vec<String> = ["m1", "m2", "m3", "m5", "m4"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    for order in orders {
        assert_eq!(order, expected);
    }
}

#[test]
fn reconcile_replaces_placeholder_exactly_once() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 10)).is_ok());
    assert_eq!(store.messages()[0].delivery.label(), "pending");

    let outcome = store.reconcile(&local, echo("srv-1", &local, 11));
    assert_eq!(outcome, Ok(ReconcileOutcome::Replaced));
    assert_eq!(store.len(), 1);

    let message = &store.messages()[0];
    assert_eq!(message.id(), Some(&MessageId::new("srv-1")));
    assert_eq!(message.local_id(), Some(&local));
    assert!(store
        .messages()
        .iter()
        .all(|m| m.delivery.label() == "sent"));
}

#[test]
fn reconcile_fills_in_local_id_when_server_omits_it() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 10)).is_ok());

    assert!(store.reconcile(&local, from_coach("srv-1", 11)).is_ok());
    assert!(matches!(
        &store.messages()[0].delivery,
        Delivery::Sent { local_id: Some(l), .. } if l == &local
    ));
}

#[test]
fn push_echo_before_rest_response_yields_one_message() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 10)).is_ok());

    // The echo of our own message, carrying id abc123, wins the race.
    assert_eq!(
        store.apply_incoming(echo("abc123", &local, 10)),
        Ok(ApplyOutcome::Replaced(local.clone()))
    );
    assert_eq!(store.len(), 1);

    // The REST response for the same message then arrives.
    assert_eq!(
        store.reconcile(&local, echo("abc123", &local, 10)),
        Ok(ReconcileOutcome::AlreadyApplied)
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].id(), Some(&MessageId::new("abc123")));
}

#[test]
fn reconcile_without_placeholder_is_an_error() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert_eq!(
        store.reconcile(&local, echo("srv-1", &local, 1)),
        Err(StoreError::UnknownLocalId(local.clone()))
    );
    assert!(store.is_empty());
}

#[test]
fn failed_messages_move_back_to_pending_only_through_retry() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 1)).is_ok());

    assert_eq!(
        store.mark_retrying(&local),
        Err(StoreError::InvalidTransition {
            from: "pending",
            to: "pending",
        })
    );
    assert!(store.mark_failed(&local, "backend unavailable").is_ok());
    assert_eq!(
        store.reconcile(&local, echo("srv-1", &local, 2)),
        Err(StoreError::InvalidTransition {
            from: "failed",
            to: "sent",
        })
    );
    assert!(store.mark_retrying(&local).is_ok());
    assert!(store.reconcile(&local, echo("srv-1", &local, 2)).is_ok());

    // Sent never regresses.
    assert_eq!(
        store.mark_failed(&local, "late failure"),
        Err(StoreError::UnknownLocalId(local.clone()))
    );
}

#[test]
fn placeholders_must_be_fresh_drafts() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 1)).is_ok());
    assert_eq!(
        store.insert_placeholder(draft(&local, 2)),
        Err(StoreError::DuplicateLocalId(local.clone()))
    );

    let mut not_a_draft = draft(&LocalId::mint(), 3);
    not_a_draft.delivery = Delivery::Sent {
        id: MessageId::new("srv-9"),
        local_id: None,
    };
    assert!(matches!(
        store.insert_placeholder(not_a_draft),
        Err(StoreError::InvalidTransition { from: "sent", .. })
    ));
}

#[test]
fn attachments_are_sealed_once_sent() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    let photo = Attachment {
        path: "uploads/conv-42/1-photo.jpg".to_owned(),
        media_type: MediaType::Image,
    };
    assert!(store.insert_placeholder(draft(&local, 1)).is_ok());
    assert!(store.attach(&local, vec![photo.clone()]).is_ok());
    assert!(store.reconcile(&local, echo("srv-1", &local, 2)).is_ok());

    assert_eq!(
        store.attach(&local, vec![photo]),
        Err(StoreError::AttachmentsSealed(MessageId::new("srv-1")))
    );
}

#[test]
fn provisional_peer_message_is_superseded_by_its_record() {
    let mut store = MessageStore::new();
    let peer_local = LocalId::mint();
    let mut provisional = Message::from(from_client("ignored", 4));
    provisional.delivery = Delivery::Pending {
        local_id: peer_local.clone(),
    };

    assert!(store.apply_provisional(provisional.clone()));
    assert!(!store.apply_provisional(provisional));
    assert_eq!(store.len(), 1);

    let record = MessageRecord {
        local_id: Some(peer_local.clone()),
        ..from_client("srv-7", 4)
    };
    assert_eq!(
        store.apply_incoming(record),
        Ok(ApplyOutcome::Replaced(peer_local))
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].id(), Some(&MessageId::new("srv-7")));
}

fn provisional_from_client(local_id: &LocalId, secs: i64) -> Message {
    let mut provisional = Message::from(from_client("ignored", secs));
    provisional.delivery = Delivery::Pending {
        local_id: local_id.clone(),
    };
    provisional
}

#[test]
fn record_without_local_id_supersedes_provisional_with_same_timestamp() {
    let mut store = MessageStore::new();
    let peer_local = LocalId::mint();
    assert!(store.apply_provisional(provisional_from_client(&peer_local, 4)));

    assert_eq!(
        store.apply_incoming(from_client("abc123", 4)),
        Ok(ApplyOutcome::Replaced(peer_local))
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].id(), Some(&MessageId::new("abc123")));
    assert_eq!(store.unread_incoming(&coach()), vec![MessageId::new("abc123")]);
}

#[test]
fn provisional_arriving_after_its_record_is_ignored() {
    let mut store = MessageStore::new();
    assert!(store.apply_incoming(from_client("abc123", 4)).is_ok());

    assert!(!store.apply_provisional(provisional_from_client(&LocalId::mint(), 4)));
    assert_eq!(store.len(), 1);
}

#[test]
fn record_with_other_timestamp_leaves_provisional_alone() {
    let mut store = MessageStore::new();
    let peer_local = LocalId::mint();
    assert!(store.apply_provisional(provisional_from_client(&peer_local, 4)));

    assert_eq!(
        store.apply_incoming(from_client("m9", 5)),
        Ok(ApplyOutcome::Inserted)
    );
    assert_eq!(store.len(), 2);
}

#[test]
fn record_without_local_id_never_retires_our_placeholder() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 4)).is_ok());

    assert_eq!(
        store.apply_incoming(from_coach("srv-3", 4)),
        Ok(ApplyOutcome::Inserted)
    );
    assert!(store.get_local(&local).is_some_and(|m| m.id().is_none()));
}

#[test]
fn foreign_record_does_not_replace_our_placeholder() {
    let mut store = MessageStore::new();
    let local = LocalId::mint();
    assert!(store.insert_placeholder(draft(&local, 1)).is_ok());

    // Same local id from the other participant: a different message.
    let record = MessageRecord {
        local_id: Some(local.clone()),
        ..from_client("srv-2", 2)
    };
    assert_eq!(store.apply_incoming(record), Ok(ApplyOutcome::Inserted));
    assert_eq!(store.len(), 2);
}

#[test]
fn mark_read_reports_only_flipped_ids_and_unread_tracks_incoming() {
    let mut store = MessageStore::new();
    for record in [from_client("m1", 1), from_client("m2", 2), from_coach("m3", 3)] {
        assert!(store.apply_incoming(record).is_ok());
    }
    assert_eq!(
        store.unread_incoming(&coach()),
        vec![MessageId::new("m1"), MessageId::new("m2")]
    );

    assert_eq!(
        store.mark_read(&[MessageId::new("m1"), MessageId::new("missing")]),
        vec![MessageId::new("m1")]
    );
    assert_eq!(store.mark_read(&[MessageId::new("m1")]), Vec::<MessageId>::new());
    assert_eq!(store.unread_incoming(&coach()), vec![MessageId::new("m2")]);
}
