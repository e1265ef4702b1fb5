//! Listener diagnostics.
//!
//! Listeners never fail on bad input; they log and report it here instead.
//! Diagnostics are best effort: with no subscriber they are dropped.

use tokio::sync::broadcast;

use crate::domain::PublisherId;

/// Something a listener skipped or observed while receiving
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerDiagnostic {
    /// A message could not be decoded or failed validation.
    MalformedMessage { channel: String, error: String },
    /// A response carried another exporter's publisher id.
    ForeignPublisher { publisher_id: PublisherId },
    /// A signal arrived on a publisher channel it does not belong to.
    MismatchedPublisher {
        channel: String,
        publisher_id: PublisherId,
    },
    /// The listener fell behind and lost messages.
    Lagged { channel: String, skipped: u64 },
    /// A subscription ended.
    StreamClosed { channel: String },
}

/// Sender half shared by a listener.
#[derive(Debug, Clone)]
pub(crate) struct Diagnostics {
    tx: broadcast::Sender<ListenerDiagnostic>,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn report(&self, diagnostic: ListenerDiagnostic) {
        // No receivers is fine
        let _ = self.tx.send(diagnostic);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ListenerDiagnostic> {
        self.tx.subscribe()
    }
}
