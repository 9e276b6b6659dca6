//! Seen marker: the most recent self-authored message the peer has read.

use crate::types::{Message, ParticipantId};

/// Latest message authored by `self_id` with `read = true`.
///
/// Linear in the number of messages; recomputed on every snapshot.
/// Timestamp ties resolve to the later entry in display order.
pub fn seen_marker<'a>(messages: &'a [Message], self_id: &ParticipantId) -> Option<&'a Message> {
    messages
        .iter()
        .filter(|m| m.is_from(self_id) && m.read && m.id().is_some())
        .max_by_key(|m| m.timestamp)
}
