//! Subscriber Registry - the responders locked onto one exporter session.
//!
//! Writers: the exporter's listener (admission) and shutdown (wipe-all).
//! Readers: `publish_signal`, which takes a snapshot per round.
//!
//! Once sealed by shutdown the registry stays empty: late admissions are
//! refused rather than resurrecting the session.

use std::collections::HashSet;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::identity::ResponderId;

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newly registered.
    Admitted,
    /// Already registered; nothing changed.
    AlreadyPresent,
    /// The session has shut down.
    Sealed,
}

#[derive(Debug, Default)]
struct RegistryInner {
    members: HashSet<ResponderId>,
    sealed: bool,
}

/// Concurrency-safe set of responder ids
#[derive(Debug)]
pub struct SubscriberRegistry {
    inner: RwLock<RegistryInner>,
    /// Publishes the member count after every change.
    size_tx: watch::Sender<usize>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        let (size_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            size_tx,
        }
    }

    /// Register a responder.
    pub fn admit(&self, responder_id: ResponderId) -> Admission {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Admission::Sealed;
        }
        if !inner.members.insert(responder_id) {
            return Admission::AlreadyPresent;
        }
        self.size_tx.send_replace(inner.members.len());
        Admission::Admitted
    }

    /// Point-in-time copy of the members.
    ///
    /// Responders admitted after this call are not part of the returned set.
    pub fn snapshot(&self) -> HashSet<ResponderId> {
        self.inner.read().members.clone()
    }

    /// Members in sorted order.
    pub fn members(&self) -> Vec<ResponderId> {
        let mut members: Vec<_> = self.inner.read().members.iter().cloned().collect();
        members.sort();
        members
    }

    /// Atomically wipe every member and refuse all later admissions.
    ///
    /// Returns the number of members removed.
    pub fn seal(&self) -> usize {
        let mut inner = self.inner.write();
        inner.sealed = true;
        let removed = inner.members.len();
        inner.members.clear();
        self.size_tx.send_replace(0);
        removed
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    pub fn contains(&self, responder_id: &ResponderId) -> bool {
        self.inner.read().members.contains(responder_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().members.is_empty()
    }

    /// Watch the member count.
    pub fn watch_len(&self) -> watch::Receiver<usize> {
        self.size_tx.subscribe()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
