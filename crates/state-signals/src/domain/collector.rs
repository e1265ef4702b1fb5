//! Response Collector - timed response rounds for published signals.
//!
//! Flow:
//! 1. `publish_signal` snapshots the registry and calls `open()` BEFORE the
//!    signal goes out, so fast responders cannot be missed
//! 2. The exporter's listener feeds every decoded Response into `offer()`
//! 3. `wait()` resolves when every expected responder answered, the timeout
//!    elapsed, or shutdown aborted the round
//!
//! Once a round is closed its late responses find no round and are dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::identity::ResponderId;
use super::payload::{RasCode, Response};
use crate::error::SignalError;

/// Identifier of one collection round.
pub type RoundId = u64;

/// A responder's answer within a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub ras_code: RasCode,
    pub payload: Value,
    /// Time from round open to arrival.
    pub latency: Duration,
}

/// Per-responder result of a round.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Replied(Reply),
    TimedOut,
}

impl ReplyStatus {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn ras_code(&self) -> Option<RasCode> {
        match self {
            Self::Replied(reply) => Some(reply.ras_code),
            Self::TimedOut => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Replied(reply) => Some(&reply.payload),
            Self::TimedOut => None,
        }
    }
}

/// What happened to an offered response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Delivered to the given round.
    Accepted(RoundId),
    /// A round for this event is open but does not await this responder.
    Unexpected,
    /// No round for this event is open (late or unsolicited).
    NoOpenRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Complete,
    Aborted,
}

struct PendingRound {
    event: String,
    awaiting: HashSet<ResponderId>,
    replies: HashMap<ResponderId, Reply>,
    opened_at: Instant,
    notify: Option<oneshot::Sender<RoundEnd>>,
}

impl PendingRound {
    fn finish(&mut self, end: RoundEnd) {
        if let Some(notify) = self.notify.take() {
            // Waiter may have given up already
            let _ = notify.send(end);
        }
    }
}

/// Handle returned by `open()`; consumed by `wait()`.
#[derive(Debug)]
pub struct RoundHandle {
    id: RoundId,
    done: oneshot::Receiver<RoundEnd>,
}

impl RoundHandle {
    pub fn id(&self) -> RoundId {
        self.id
    }
}

/// Statistics for the collector
#[derive(Debug, Default)]
pub struct CollectorStats {
    pub rounds_opened: AtomicU64,
    pub rounds_completed: AtomicU64,
    pub rounds_timed_out: AtomicU64,
    pub rounds_aborted: AtomicU64,
    pub late_responses: AtomicU64,
    pub unexpected_responses: AtomicU64,
}

/// Plain copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStatsSnapshot {
    pub rounds_opened: u64,
    pub rounds_completed: u64,
    pub rounds_timed_out: u64,
    pub rounds_aborted: u64,
    pub late_responses: u64,
    pub unexpected_responses: u64,
}

impl CollectorStats {
    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            rounds_opened: self.rounds_opened.load(Ordering::Relaxed),
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            rounds_timed_out: self.rounds_timed_out.load(Ordering::Relaxed),
            rounds_aborted: self.rounds_aborted.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            unexpected_responses: self.unexpected_responses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct CollectorInner {
    rounds: BTreeMap<RoundId, PendingRound>,
    next_id: RoundId,
    closed: bool,
}

/// Collects responses for concurrently open rounds.
///
/// Rounds for the same event are served oldest first: a response goes to the
/// oldest open round that still awaits its responder.
#[derive(Default)]
pub struct ResponseCollector {
    inner: Mutex<CollectorInner>,
    stats: CollectorStats,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a round expecting one response from each of `expected`.
    ///
    /// An empty expectation completes immediately. Fails with
    /// `ShutdownInProgress` once `abort_all()` has run.
    pub fn open(
        &self,
        event: &str,
        expected: HashSet<ResponderId>,
    ) -> Result<RoundHandle, SignalError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SignalError::ShutdownInProgress);
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let (tx, rx) = oneshot::channel();
        let mut round = PendingRound {
            event: event.to_string(),
            awaiting: expected,
            replies: HashMap::new(),
            opened_at: Instant::now(),
            notify: Some(tx),
        };
        if round.awaiting.is_empty() {
            round.finish(RoundEnd::Complete);
        }

        debug!(
            round = id,
            event = event,
            expected = round.awaiting.len(),
            "Opened response round"
        );
        inner.rounds.insert(id, round);
        self.stats.rounds_opened.fetch_add(1, Ordering::Relaxed);

        Ok(RoundHandle { id, done: rx })
    }

    /// Route a response to the oldest open round awaiting it.
    pub fn offer(&self, response: &Response) -> Offer {
        let Some(ras_code) = response.ras_code() else {
            // Only initialization responses lack a RAS code; they never belong to a round
            return Offer::NoOpenRound;
        };

        let mut inner = self.inner.lock();
        let mut event_seen = false;

        for (id, round) in inner.rounds.iter_mut() {
            if round.event != response.event() {
                continue;
            }
            event_seen = true;
            if !round.awaiting.remove(response.responder_id()) {
                continue;
            }

            round.replies.insert(
                response.responder_id().clone(),
                Reply {
                    ras_code,
                    payload: response.payload().clone(),
                    latency: round.opened_at.elapsed(),
                },
            );
            if round.awaiting.is_empty() {
                round.finish(RoundEnd::Complete);
            }
            return Offer::Accepted(*id);
        }

        if event_seen {
            self.stats
                .unexpected_responses
                .fetch_add(1, Ordering::Relaxed);
            Offer::Unexpected
        } else {
            self.stats.late_responses.fetch_add(1, Ordering::Relaxed);
            Offer::NoOpenRound
        }
    }

    /// Wait for a round to finish, bounded by `timeout`.
    ///
    /// Every responder of the round's snapshot appears in the result, either
    /// with its reply or as timed out.
    pub async fn wait(
        &self,
        handle: RoundHandle,
        timeout: Duration,
    ) -> Result<BTreeMap<ResponderId, ReplyStatus>, SignalError> {
        let RoundHandle { id, done } = handle;

        match tokio::time::timeout(timeout, done).await {
            Ok(Ok(RoundEnd::Complete)) | Err(_) => self
                .close(id)
                .ok_or(SignalError::ShutdownInProgress),
            Ok(Ok(RoundEnd::Aborted)) | Ok(Err(_)) => Err(SignalError::ShutdownInProgress),
        }
    }

    /// Remove a round without reporting it (the signal never went out).
    pub fn discard(&self, id: RoundId) {
        self.inner.lock().rounds.remove(&id);
    }

    /// Close a round and build its per-responder result.
    ///
    /// Returns `None` when the round no longer exists (aborted by shutdown).
    fn close(&self, id: RoundId) -> Option<BTreeMap<ResponderId, ReplyStatus>> {
        let round = self.inner.lock().rounds.remove(&id)?;

        let mut result: BTreeMap<_, _> = round
            .replies
            .into_iter()
            .map(|(responder, reply)| (responder, ReplyStatus::Replied(reply)))
            .collect();

        if round.awaiting.is_empty() {
            self.stats.rounds_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rounds_timed_out.fetch_add(1, Ordering::Relaxed);
            debug!(
                round = id,
                event = %round.event,
                missing = round.awaiting.len(),
                "Response round timed out"
            );
            result.extend(
                round
                    .awaiting
                    .into_iter()
                    .map(|responder| (responder, ReplyStatus::TimedOut)),
            );
        }

        Some(result)
    }

    /// Abort every open round and refuse new ones.
    ///
    /// Waiters of aborted rounds fail with `ShutdownInProgress`. Returns the
    /// number of rounds aborted.
    pub fn abort_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let rounds = std::mem::take(&mut inner.rounds);
        let aborted = rounds.len();
        for (_, mut round) in rounds {
            round.finish(RoundEnd::Aborted);
        }
        self.stats
            .rounds_aborted
            .fetch_add(aborted as u64, Ordering::Relaxed);
        aborted
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of rounds currently open.
    pub fn open_rounds(&self) -> usize {
        self.inner.lock().rounds.len()
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }
}
