//! Push transport connection tracking.
//!
//! The [`ConnectionMonitor`] only decides whether a push emit is worth
//! attempting. It never gates persistence calls, and nothing is queued
//! while disconnected.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Tracks whether the push transport is currently connected.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    connected: AtomicBool,
}

impl ConnectionMonitor {
    /// Create a monitor in the disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transport connect signal.
    ///
    /// Returns `true` if this was a transition from disconnected.
    pub fn on_connect(&self) -> bool {
        let was = self.connected.swap(true, Ordering::AcqRel);
        if !was {
            info!("push transport connected");
        }
        !was
    }

    /// Record a transport disconnect signal.
    ///
    /// Returns `true` if this was a transition from connected.
    pub fn on_disconnect(&self) -> bool {
        let was = self.connected.swap(false, Ordering::AcqRel);
        if was {
            info!("push transport disconnected");
        }
        was
    }

    /// Whether the transport is connected right now.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
