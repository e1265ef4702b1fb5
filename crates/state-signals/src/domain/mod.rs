//! Domain layer: entities, identities and the in-memory session state.

pub mod collector;
pub mod events;
pub mod identity;
pub mod payload;
pub mod registry;
pub mod report;

pub use collector::{
    CollectorStats, CollectorStatsSnapshot, Offer, Reply, ReplyStatus, ResponseCollector,
    RoundHandle, RoundId,
};
pub use events::{is_reserved, LegalEvents, INITIALIZATION, RESERVED_EVENTS, SHUTDOWN};
pub use identity::{PublisherId, ResponderId};
pub use payload::{
    RasCode, Response, Signal, SignalContent, SignalOrigin, DEFAULT_SAMPLE_NO, DEFAULT_TAG,
};
pub use registry::{Admission, SubscriberRegistry};
pub use report::{PublishReport, ResultCode};
