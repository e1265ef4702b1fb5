//! Outcome of one `publish_signal` call.

use std::collections::BTreeMap;
use std::time::Duration;

use super::collector::ReplyStatus;
use super::identity::ResponderId;

/// Aggregate result of a publish or a handshake wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Every expected responder answered with RAS success.
    AllSubsSuccess = 0,
    /// Every expected responder answered, at least one reported failure.
    SubFailed = 1,
    /// At least one expected responder did not answer in time.
    MissingResponse = 2,
}

impl ResultCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == Self::AllSubsSuccess
    }
}

/// Per-responder outcome of a published signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    event: String,
    awaited: bool,
    replies: BTreeMap<ResponderId, ReplyStatus>,
    elapsed: Duration,
}

impl PublishReport {
    pub(crate) fn fire_and_forget(event: &str) -> Self {
        Self {
            event: event.to_string(),
            awaited: false,
            replies: BTreeMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn collected(
        event: &str,
        replies: BTreeMap<ResponderId, ReplyStatus>,
        elapsed: Duration,
    ) -> Self {
        Self {
            event: event.to_string(),
            awaited: true,
            replies,
            elapsed,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Whether the publish waited for responses at all.
    pub fn awaited(&self) -> bool {
        self.awaited
    }

    /// Time spent waiting for responses.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn replies(&self) -> &BTreeMap<ResponderId, ReplyStatus> {
        &self.replies
    }

    pub fn get(&self, responder_id: &str) -> Option<&ReplyStatus> {
        self.replies.get(responder_id)
    }

    /// Responders that did not answer in time.
    pub fn timed_out(&self) -> Vec<&ResponderId> {
        self.replies
            .iter()
            .filter(|(_, status)| status.is_timed_out())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Missing responses take precedence over failed ones.
    pub fn result_code(&self) -> ResultCode {
        let mut failed = false;
        for status in self.replies.values() {
            match status.ras_code() {
                None => return ResultCode::MissingResponse,
                Some(code) if !code.is_success() => failed = true,
                Some(_) => {}
            }
        }
        if failed {
            ResultCode::SubFailed
        } else {
            ResultCode::AllSubsSuccess
        }
    }
}
