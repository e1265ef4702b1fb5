//! Inbound Port: delivery of received signals to the application.
//!
//! The responder's listener calls [`SignalHandler::on_signal`] once per
//! accepted signal, in arrival order. The application answers through
//! `SignalResponder::respond` / `srespond`, from inside the handler or later.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Signal;

/// Application callback for received signals
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// Handle one signal.
    ///
    /// The listener awaits this before delivering the next signal, so long
    /// running work should be moved off the listener task.
    async fn on_signal(&self, signal: Signal);
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`SignalHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Signal) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> SignalHandler for FnHandler<F>
where
    F: Fn(Signal) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_signal(&self, signal: Signal) {
        (self.f)(signal).await
    }
}

/// Handler forwarding every signal into an mpsc channel.
///
/// Lets the application consume signals as a stream:
///
/// ```ignore
/// let (handler, mut signals) = ChannelHandler::channel(16);
/// let responder = SignalResponder::start(bus, config, Arc::new(handler))?;
/// while let Some(signal) = signals.recv().await {
///     responder.srespond(&signal, Some(RasCode::SUCCESS), Value::Null).await?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::Sender<Signal>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::Sender<Signal>) -> Self {
        Self { tx }
    }

    /// Create a handler together with the receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SignalHandler for ChannelHandler {
    async fn on_signal(&self, signal: Signal) {
        if self.tx.send(signal).await.is_err() {
            debug!("Signal receiver dropped, discarding signal");
        }
    }
}
