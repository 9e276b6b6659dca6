//! In-process push transport backed by a tokio mpsc channel.
//!
//! Emits are forwarded to the receiver returned by
//! [`ChannelTransport::new`]. Hosts bridge that receiver to a real socket;
//! tests read it directly to observe what would have gone over the wire.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use super::{PushEvent, PushTransport, TransportError};

/// Push transport that forwards emits into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its emits are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    async fn emit(&self, event: PushEvent) -> Result<(), TransportError> {
        trace!(event = event.name(), "push emit");
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }
}
