//! Chatsync — synchronization core for one-to-one coach/client chat.
//!
//! Keeps a local message view consistent with a REST persistence service
//! and a low-latency push channel: optimistic sends reconciled by local id,
//! idempotent merging of duplicated and reordered deliveries, batched read
//! receipts, debounced typing presence and a seen marker.
//!
//! Rendering and the transport's wire protocol live outside this crate; the
//! host drives a [`session::ChatSession`] and renders its snapshots.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod backend;
pub mod connection;
pub mod store;
pub mod transport;

pub mod session;
pub mod sync;
