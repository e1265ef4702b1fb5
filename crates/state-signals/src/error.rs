//! Error types for the state signal protocol

use shared_bus::BusError;
use thiserror::Error;

use crate::config::ConfigError;

/// Protocol result alias.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors surfaced by exporter and responder operations
#[derive(Debug, Error)]
pub enum SignalError {
    /// Bad input rejected at the protocol boundary.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Operation invoked outside its permitted lifecycle state.
    #[error("Operation '{operation}' not permitted in state {state}")]
    State {
        operation: &'static str,
        state: &'static str,
    },

    /// An in-flight response wait was invalidated by a concurrent shutdown.
    #[error("Shutdown in progress, pending response collection aborted")]
    ShutdownInProgress,

    /// The bus rejected a publish or a subscription.
    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    /// A record could not be encoded for the wire.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl SignalError {
    pub(crate) fn state(operation: &'static str, state: &'static str) -> Self {
        Self::State { operation, state }
    }
}

impl From<ConfigError> for SignalError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(ValidationError::Config(err))
    }
}

/// Validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is a reserved event name")]
    ReservedEvent(String),

    #[error("Malformed event name: {0:?}")]
    MalformedEvent(String),

    #[error("Legal event set must not be empty")]
    EmptyLegalEvents,

    #[error("Event {event} not one of legal events: {legal}")]
    IllegalEvent { event: String, legal: String },

    #[error("RAS code required when responding to event '{event}'")]
    MissingRasCode { event: String },

    #[error("Identifier must not be empty")]
    EmptyIdentifier,

    #[error("Publisher {0} has already shut down")]
    PublisherShutDown(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Wire encoding/decoding failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
}
