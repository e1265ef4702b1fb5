//! # Message Subscriber
//!
//! Defines the subscription side of the bus.

use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Shared channel table: channel name -> broadcast sender.
pub(crate) type ChannelMap = Arc<RwLock<HashMap<String, broadcast::Sender<Bytes>>>>;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The channel (or the whole bus) was closed.
    #[error("Subscription closed")]
    Closed,

    /// The subscriber fell behind and `0` messages were lost.
    #[error("Subscriber lagged, {0} messages dropped")]
    Lagged(u64),
}

/// Removes the channel from the table once its last subscription is gone.
struct ChannelGuard {
    channel: String,
    channels: ChannelMap,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let Ok(mut channels) = self.channels.write() else {
            return;
        };
        let unused = channels
            .get(&self.channel)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if unused {
            channels.remove(&self.channel);
        }
        debug!(channel = %self.channel, "Subscription dropped");
    }
}

/// A subscription handle for receiving messages from one channel.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct Subscription {
    /// The broadcast receiver. Declared before the guard so it is dropped first.
    receiver: broadcast::Receiver<Bytes>,

    /// Channel cleanup on drop.
    guard: ChannelGuard,
}

impl Subscription {
    pub(crate) fn new(
        channel: String,
        receiver: broadcast::Receiver<Bytes>,
        channels: ChannelMap,
    ) -> Self {
        Self {
            receiver,
            guard: ChannelGuard { channel, channels },
        }
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Ok(bytes)` - The next message
    /// - `Err(SubscriptionError::Lagged(n))` - `n` messages were lost; the
    ///   next call continues with the oldest retained message
    /// - `Err(SubscriptionError::Closed)` - The channel was closed
    pub async fn recv(&mut self) -> Result<Bytes, SubscriptionError> {
        match self.receiver.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                debug!(channel = %self.guard.channel, lagged = count, "Subscriber lagged");
                Err(SubscriptionError::Lagged(count))
            }
        }
    }

    /// Try to receive the next message without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` - A message was available
    /// - `Ok(None)` - No message available (would block)
    /// - `Err(_)` - The channel was closed or the subscriber lagged
    pub fn try_recv(&mut self) -> Result<Option<Bytes>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(SubscriptionError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Err(SubscriptionError::Lagged(count))
            }
        }
    }

    /// Name of the subscribed channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.guard.channel
    }

    /// Convert into a [`Stream`] for use with stream combinators.
    #[must_use]
    pub fn into_stream(self) -> MessageStream {
        let Subscription { receiver, guard } = self;
        MessageStream {
            inner: BroadcastStream::new(receiver),
            guard,
        }
    }
}

/// A stream wrapper for subscriptions.
///
/// Yields `Err(SubscriptionError::Lagged(_))` in place of lost messages and
/// ends when the channel closes.
pub struct MessageStream {
    inner: BroadcastStream<Bytes>,
    guard: ChannelGuard,
}

impl MessageStream {
    /// Name of the subscribed channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.guard.channel
    }
}

impl Stream for MessageStream {
    type Item = Result<Bytes, SubscriptionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                Poll::Ready(Some(Err(SubscriptionError::Lagged(count))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
