//! Wire entities: [`Signal`] and [`Response`].
//!
//! Both are immutable once built. Constructors and decoders enforce the
//! protocol invariants, so an instance that exists is valid:
//!
//! - event names are well-formed
//! - a Response to anything but `initialization` carries a RAS code

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{check_event_name, INITIALIZATION};
use super::identity::{PublisherId, ResponderId};
use crate::error::{CodecError, ValidationError};

/// Default `sample_no` when the publisher does not number its samples.
pub const DEFAULT_SAMPLE_NO: i64 = -1;

/// Default `tag` when the publisher does not tag a signal.
pub const DEFAULT_TAG: &str = "No tag specified";

/// Current wall-clock time as Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Response-Action-Success code.
///
/// `1` means the responder acted on the signal successfully; any other value
/// is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RasCode(i32);

impl RasCode {
    pub const SUCCESS: Self = Self(1);
    pub const FAILURE: Self = Self(0);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

impl From<i32> for RasCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for RasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SIGNAL
// =============================================================================

/// Exporter-side fields shared by every signal of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalOrigin {
    pub publisher_id: PublisherId,
    pub process_name: String,
    pub runner_host: String,
}

/// Per-signal descriptive fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalContent {
    pub sample_no: i64,
    pub tag: Option<String>,
    pub payload: Value,
    pub awaits_response: bool,
}

impl Default for SignalContent {
    fn default() -> Self {
        Self {
            sample_no: DEFAULT_SAMPLE_NO,
            tag: None,
            payload: Value::Null,
            awaits_response: false,
        }
    }
}

/// A published state/event notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SignalRecord")]
pub struct Signal {
    publisher_id: PublisherId,
    process_name: String,
    event: String,
    runner_host: String,
    sample_no: i64,
    tag: String,
    timestamp: u64,
    #[serde(skip_serializing_if = "Value::is_null")]
    payload: Value,
    awaits_response: bool,
}

/// Raw wire shape, validated into [`Signal`].
#[derive(Deserialize)]
struct SignalRecord {
    publisher_id: PublisherId,
    process_name: String,
    event: String,
    runner_host: String,
    #[serde(default = "default_sample_no")]
    sample_no: i64,
    #[serde(default = "default_tag")]
    tag: String,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    awaits_response: bool,
}

fn default_sample_no() -> i64 {
    DEFAULT_SAMPLE_NO
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl TryFrom<SignalRecord> for Signal {
    type Error = ValidationError;

    fn try_from(record: SignalRecord) -> Result<Self, Self::Error> {
        check_event_name(&record.event)?;
        if record.publisher_id.as_str().is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }
        Ok(Self {
            publisher_id: record.publisher_id,
            process_name: record.process_name,
            event: record.event,
            runner_host: record.runner_host,
            sample_no: record.sample_no,
            tag: record.tag,
            timestamp: record.timestamp,
            payload: record.payload,
            awaits_response: record.awaits_response,
        })
    }
}

impl Signal {
    /// Build a signal stamped with the current time.
    ///
    /// Only the event name's shape is checked here; whether the exporter may
    /// publish it is decided against its legal event set.
    pub fn new(
        origin: &SignalOrigin,
        event: &str,
        content: SignalContent,
    ) -> Result<Self, ValidationError> {
        check_event_name(event)?;
        Ok(Self {
            publisher_id: origin.publisher_id.clone(),
            process_name: origin.process_name.clone(),
            event: event.to_string(),
            runner_host: origin.runner_host.clone(),
            sample_no: content.sample_no,
            tag: content.tag.unwrap_or_else(default_tag),
            timestamp: now_millis(),
            payload: content.payload,
            awaits_response: content.awaits_response,
        })
    }

    pub fn publisher_id(&self) -> &PublisherId {
        &self.publisher_id
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn runner_host(&self) -> &str {
        &self.runner_host
    }

    pub fn sample_no(&self) -> i64 {
        self.sample_no
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Unix milliseconds at construction.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn awaits_response(&self) -> bool {
        self.awaits_response
    }

    pub fn is_initialization(&self) -> bool {
        self.event == INITIALIZATION
    }

    pub fn is_shutdown(&self) -> bool {
        self.event == super::events::SHUTDOWN
    }

    /// Encode as a JSON wire record.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    /// Decode and validate a JSON wire record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// A responder's reply to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseRecord")]
pub struct Response {
    publisher_id: PublisherId,
    event: String,
    responder_id: ResponderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    ras_code: Option<RasCode>,
    timestamp: u64,
    #[serde(skip_serializing_if = "Value::is_null")]
    payload: Value,
}

/// Raw wire shape, validated into [`Response`].
#[derive(Deserialize)]
struct ResponseRecord {
    publisher_id: PublisherId,
    event: String,
    responder_id: ResponderId,
    #[serde(default)]
    ras_code: Option<RasCode>,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<ResponseRecord> for Response {
    type Error = ValidationError;

    fn try_from(record: ResponseRecord) -> Result<Self, Self::Error> {
        let mut response = Response::new(
            record.responder_id,
            record.publisher_id,
            &record.event,
            record.ras_code,
            record.payload,
        )?;
        response.timestamp = record.timestamp;
        Ok(response)
    }
}

impl Response {
    /// Build a response stamped with the current time.
    ///
    /// Fails when the event name is malformed, an identifier is empty, or a
    /// RAS code is missing for an event other than `initialization`.
    pub fn new(
        responder_id: ResponderId,
        publisher_id: PublisherId,
        event: &str,
        ras_code: Option<RasCode>,
        payload: Value,
    ) -> Result<Self, ValidationError> {
        check_event_name(event)?;
        if responder_id.as_str().is_empty() || publisher_id.as_str().is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }
        if ras_code.is_none() && event != INITIALIZATION {
            return Err(ValidationError::MissingRasCode {
                event: event.to_string(),
            });
        }
        Ok(Self {
            publisher_id,
            event: event.to_string(),
            responder_id,
            ras_code,
            timestamp: now_millis(),
            payload,
        })
    }

    pub fn publisher_id(&self) -> &PublisherId {
        &self.publisher_id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn responder_id(&self) -> &ResponderId {
        &self.responder_id
    }

    /// Always `Some` unless this answers `initialization`.
    pub fn ras_code(&self) -> Option<RasCode> {
        self.ras_code
    }

    /// Unix milliseconds at construction.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn is_initialization(&self) -> bool {
        self.event == INITIALIZATION
    }

    /// Encode as a JSON wire record.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    /// Decode and validate a JSON wire record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
