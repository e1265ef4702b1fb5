//! Channel naming on the message bus.
//!
//! - [`ANNOUNCE_CHANNEL`]: `initialization` and `shutdown` signals of every exporter
//! - [`signal_channel`]: legal-event signals of one exporter
//! - [`response_channel`]: responses addressed to one exporter

use crate::domain::PublisherId;

/// Shared channel carrying every exporter's session announcements.
pub const ANNOUNCE_CHANNEL: &str = "event-signal-pubsub";

/// Prefix of the per-exporter response channel.
pub const RESPONSE_CHANNEL_PREFIX: &str = "event-signal-response";

/// Channel carrying one exporter's legal-event signals.
pub fn signal_channel(publisher_id: &PublisherId) -> String {
    format!("{}:{}", ANNOUNCE_CHANNEL, publisher_id)
}

/// Channel carrying responses addressed to one exporter.
pub fn response_channel(publisher_id: &PublisherId) -> String {
    format!("{}:{}", RESPONSE_CHANNEL_PREFIX, publisher_id)
}
