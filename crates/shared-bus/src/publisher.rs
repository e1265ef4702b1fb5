//! # Message Publisher
//!
//! Defines the bus contract and its in-memory implementation.

use crate::subscriber::{ChannelMap, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Errors raised by the bus itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed and accepts no further traffic.
    #[error("Message bus closed")]
    Closed,

    /// Channel names must be non-empty.
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// Internal channel table lock was poisoned by a panicking thread.
    #[error("Channel table lock poisoned")]
    LockPoisoned,
}

/// Publish/subscribe contract the signal protocol is written against.
///
/// Delivery is best-effort: no durability, no replay, and no ordering
/// across channels.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message to a channel.
    ///
    /// # Returns
    ///
    /// The number of subscriptions the message was handed to (possibly 0).
    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize, BusError>;

    /// Subscribe to every message published to `channel` from now on.
    fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// In-process implementation of the bus.
///
/// Each channel is backed by a `tokio::sync::broadcast` channel that is
/// created on first subscription and removed when its last subscription
/// is dropped.
pub struct InMemoryMessageBus {
    /// Channel name -> broadcast sender.
    channels: ChannelMap,

    /// Total publish calls that were accepted.
    messages_published: AtomicU64,

    /// Accepted publishes that reached nobody.
    messages_dropped: AtomicU64,

    /// Per-channel buffer capacity.
    capacity: usize,

    /// Set once by `close()`.
    closed: AtomicBool,
}

impl InMemoryMessageBus {
    /// Create a new in-memory bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory bus with specified per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            messages_published: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the bus.
    ///
    /// Every later publish/subscribe fails with [`BusError::Closed`] and all
    /// open subscriptions observe the end of their stream.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut channels) = self.channels.write() {
            // Dropping the senders ends every receiver.
            channels.clear();
        }
        debug!("Message bus closed");
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(channel).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    /// Number of channels that currently have subscriptions.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Total publish calls accepted so far.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Accepted publishes that had no receivers.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get the per-channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_channel(&self, channel: &str) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        if channel.trim().is_empty() {
            return Err(BusError::InvalidChannel(channel.to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize, BusError> {
        self.check_channel(channel)?;
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let sender = {
            let channels = self.channels.read().map_err(|_| BusError::LockPoisoned)?;
            channels.get(channel).cloned()
        };

        let Some(sender) = sender else {
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(channel = channel, "Message dropped (no channel)");
            return Ok(0);
        };

        let bytes = message.len();
        match sender.send(message) {
            Ok(receivers) => {
                trace!(
                    channel = channel,
                    bytes = bytes,
                    receivers = receivers,
                    "Message published"
                );
                Ok(receivers)
            }
            Err(_) => {
                // Channel exists but every receiver is gone
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(channel = channel, "Message dropped (no receivers)");
                Ok(0)
            }
        }
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        self.check_channel(channel)?;

        let receiver = {
            let mut channels = self.channels.write().map_err(|_| BusError::LockPoisoned)?;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        debug!(channel = channel, "New subscription created");

        Ok(Subscription::new(
            channel.to_string(),
            receiver,
            self.channels.clone(),
        ))
    }
}
