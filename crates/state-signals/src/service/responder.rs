//! Signal Responder - the subscriber side of the protocol.
//!
//! A responder always listens on the announce channel. Responding to an
//! exporter's `initialization` locks it onto that exporter: the responder
//! subscribes to `event-signal-pubsub:<publisher_id>` before the response is
//! published, so no later signal can be missed. A `shutdown` announcement
//! releases the lock.
//!
//! One listener task multiplexes every subscription and hands accepted
//! signals to the application's [`SignalHandler`] in arrival order.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use shared_bus::{MessageBus, MessageStream, SubscriptionError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use super::diagnostics::{Diagnostics, ListenerDiagnostic};
use crate::channels::{response_channel, signal_channel, ANNOUNCE_CHANNEL};
use crate::config::ResponderConfig;
use crate::domain::{PublisherId, RasCode, ResponderId, Response, Signal};
use crate::error::{Result, SignalError, ValidationError};
use crate::ports::SignalHandler;

/// Lifecycle label used in state errors once stopped.
const STOPPED: &str = "Stopped";

/// Publisher ids remembered per history set; the oldest are forgotten first.
const PUBLISHER_HISTORY: usize = 1024;

/// Insertion-ordered set of publisher ids holding at most `capacity` entries.
#[derive(Debug)]
struct PublisherHistory {
    order: VecDeque<PublisherId>,
    ids: HashSet<PublisherId>,
    capacity: usize,
}

impl PublisherHistory {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity,
        }
    }

    fn insert(&mut self, publisher_id: PublisherId) {
        if !self.ids.insert(publisher_id.clone()) {
            return;
        }
        self.order.push_back(publisher_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, publisher_id: &PublisherId) -> bool {
        if !self.ids.remove(publisher_id) {
            return false;
        }
        self.order.retain(|id| id != publisher_id);
        true
    }

    fn contains(&self, publisher_id: &PublisherId) -> bool {
        self.ids.contains(publisher_id)
    }
}

impl Default for PublisherHistory {
    fn default() -> Self {
        Self::with_capacity(PUBLISHER_HISTORY)
    }
}

/// State shared between the handle and its listener task
#[derive(Debug, Default)]
struct ResponderShared {
    /// Publishers this responder is locked onto.
    locks: RwLock<HashSet<PublisherId>>,
    /// Publishers whose `initialization` was seen and that have not shut down.
    announced: RwLock<PublisherHistory>,
    /// Publishers seen or locked onto that later announced shutdown.
    closed: RwLock<PublisherHistory>,
    /// Only signals with this tag reach the handler (reserved events always do).
    tag: RwLock<Option<String>>,
    stopped: AtomicBool,
}

impl ResponderShared {
    fn tag_allows(&self, signal: &Signal) -> bool {
        match self.tag.read().as_deref() {
            Some(tag) => signal.tag() == tag,
            None => true,
        }
    }
}

enum Control {
    Follow {
        publisher_id: PublisherId,
        stream: MessageStream,
    },
    Unfollow(PublisherId),
    Stop,
}

/// Subscriber endpoint of the protocol
pub struct SignalResponder {
    responder_id: ResponderId,
    bus: Arc<dyn MessageBus>,
    shared: Arc<ResponderShared>,
    control: mpsc::UnboundedSender<Control>,
    task: Mutex<Option<JoinHandle<()>>>,
    diagnostics: Diagnostics,
}

impl SignalResponder {
    /// Subscribe to the announce channel and start the listener task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(
        bus: Arc<dyn MessageBus>,
        config: ResponderConfig,
        handler: Arc<dyn SignalHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let responder_id = ResponderId::generate(&config.responder_name);
        let announce = bus.subscribe(ANNOUNCE_CHANNEL)?.into_stream();

        let shared = Arc::new(ResponderShared {
            tag: RwLock::new(config.lock_tag),
            ..ResponderShared::default()
        });
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);
        let (control, control_rx) = mpsc::unbounded_channel();

        let listener = SignalListener {
            responder_id: responder_id.clone(),
            shared: Arc::clone(&shared),
            handler,
            diagnostics: diagnostics.clone(),
        };
        let task = tokio::spawn(listener.run(announce, control_rx));

        info!(responder_id = %responder_id, "Signal responder started");

        Ok(Self {
            responder_id,
            bus,
            shared,
            control,
            task: Mutex::new(Some(task)),
            diagnostics,
        })
    }

    /// Publish a response to `event` of `publisher_id`.
    ///
    /// Answering `initialization` locks this responder onto the publisher;
    /// every other event requires a RAS code.
    pub async fn respond(
        &self,
        publisher_id: &PublisherId,
        event: &str,
        ras_code: Option<RasCode>,
        payload: Value,
    ) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(SignalError::state("respond", STOPPED));
        }

        let response = Response::new(
            self.responder_id.clone(),
            publisher_id.clone(),
            event,
            ras_code,
            payload,
        )?;
        let bytes = response.encode()?;

        let newly_locked = if response.is_initialization() {
            self.lock_on(publisher_id)?
        } else {
            false
        };

        match self.bus.publish(&response_channel(publisher_id), bytes).await {
            Ok(receivers) => {
                debug!(
                    publisher_id = %publisher_id,
                    event,
                    ras_code = ?ras_code,
                    receivers,
                    "Published response"
                );
                Ok(())
            }
            Err(e) => {
                if newly_locked {
                    self.release(publisher_id);
                }
                Err(e.into())
            }
        }
    }

    /// Respond to a received signal.
    pub async fn srespond(
        &self,
        signal: &Signal,
        ras_code: Option<RasCode>,
        payload: Value,
    ) -> Result<()> {
        self.respond(signal.publisher_id(), signal.event(), ras_code, payload)
            .await
    }

    /// Subscribe to a publisher's signal channel ahead of the init response.
    ///
    /// Returns false when already locked on.
    fn lock_on(&self, publisher_id: &PublisherId) -> Result<bool> {
        if self.shared.closed.read().contains(publisher_id) {
            return Err(ValidationError::PublisherShutDown(publisher_id.to_string()).into());
        }
        if !self.shared.locks.write().insert(publisher_id.clone()) {
            return Ok(false);
        }

        let stream = match self.bus.subscribe(&signal_channel(publisher_id)) {
            Ok(subscription) => subscription.into_stream(),
            Err(e) => {
                self.shared.locks.write().remove(publisher_id);
                return Err(e.into());
            }
        };
        let follow = Control::Follow {
            publisher_id: publisher_id.clone(),
            stream,
        };
        if self.control.send(follow).is_err() {
            self.shared.locks.write().remove(publisher_id);
            return Err(SignalError::state("respond", STOPPED));
        }

        info!(publisher_id = %publisher_id, "Locked onto publisher");
        Ok(true)
    }

    fn release(&self, publisher_id: &PublisherId) {
        self.shared.locks.write().remove(publisher_id);
        let _ = self.control.send(Control::Unfollow(publisher_id.clone()));
    }

    /// Only hand signals tagged `tag` to the handler.
    ///
    /// `initialization` and `shutdown` announcements are always delivered.
    pub fn lock_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        debug!(tag = %tag, "Locked onto tag");
        *self.shared.tag.write() = Some(tag);
    }

    pub fn unlock_tag(&self) {
        debug!("Released tag lock");
        *self.shared.tag.write() = None;
    }

    pub fn locked_tag(&self) -> Option<String> {
        self.shared.tag.read().clone()
    }

    /// Publishers currently locked onto, sorted.
    pub fn locked_publishers(&self) -> Vec<PublisherId> {
        let mut publishers: Vec<_> = self.shared.locks.read().iter().cloned().collect();
        publishers.sort();
        publishers
    }

    pub fn is_locked_on(&self, publisher_id: &PublisherId) -> bool {
        self.shared.locks.read().contains(publisher_id)
    }

    pub fn responder_id(&self) -> &ResponderId {
        &self.responder_id
    }

    /// Receive listener diagnostics from now on.
    pub fn diagnostics(&self) -> broadcast::Receiver<ListenerDiagnostic> {
        self.diagnostics.subscribe()
    }

    /// Stop the listener and wait for it to finish.
    ///
    /// Later `respond` calls fail with a state error.
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control.send(Control::Stop);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Signal listener task failed");
            }
        }
        self.shared.locks.write().clear();
        info!(responder_id = %self.responder_id, "Signal responder stopped");
    }
}

impl Drop for SignalResponder {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.control.send(Control::Stop);
    }
}

impl fmt::Debug for SignalResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalResponder")
            .field("responder_id", &self.responder_id)
            .field("locked_publishers", &self.shared.locks.read().len())
            .finish()
    }
}

// =============================================================================
// SIGNAL LISTENER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FeedKey {
    Announce,
    Publisher(PublisherId),
}

impl FeedKey {
    fn channel(&self) -> String {
        match self {
            Self::Announce => ANNOUNCE_CHANNEL.to_string(),
            Self::Publisher(publisher_id) => signal_channel(publisher_id),
        }
    }
}

enum FeedItem {
    Message(std::result::Result<Bytes, SubscriptionError>),
    Ended,
}

type Feed = Pin<Box<dyn Stream<Item = FeedItem> + Send>>;

/// Marks the end of a subscription so the listener can report it.
fn feed(messages: MessageStream) -> Feed {
    Box::pin(
        messages
            .map(FeedItem::Message)
            .chain(stream::once(async { FeedItem::Ended })),
    )
}

struct SignalListener {
    responder_id: ResponderId,
    shared: Arc<ResponderShared>,
    handler: Arc<dyn SignalHandler>,
    diagnostics: Diagnostics,
}

impl SignalListener {
    async fn run(self, announce: MessageStream, mut control: mpsc::UnboundedReceiver<Control>) {
        let mut feeds: StreamMap<FeedKey, Feed> = StreamMap::new();
        feeds.insert(FeedKey::Announce, feed(announce));

        debug!(responder_id = %self.responder_id, "Signal listener started");

        loop {
            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Follow { publisher_id, stream }) => {
                        feeds.insert(FeedKey::Publisher(publisher_id), feed(stream));
                    }
                    Some(Control::Unfollow(publisher_id)) => {
                        feeds.remove(&FeedKey::Publisher(publisher_id));
                    }
                    Some(Control::Stop) | None => break,
                },
                Some((key, item)) = feeds.next() => match item {
                    FeedItem::Message(Ok(bytes)) => {
                        self.handle_message(&key, &bytes, &mut feeds).await;
                    }
                    FeedItem::Message(Err(SubscriptionError::Lagged(skipped))) => {
                        let channel = key.channel();
                        warn!(channel = %channel, skipped, "Signal listener lagged");
                        self.diagnostics
                            .report(ListenerDiagnostic::Lagged { channel, skipped });
                    }
                    FeedItem::Message(Err(SubscriptionError::Closed)) | FeedItem::Ended => {
                        let channel = key.channel();
                        warn!(channel = %channel, "Signal stream ended");
                        if let FeedKey::Publisher(publisher_id) = &key {
                            if self.shared.locks.write().remove(publisher_id) {
                                info!(publisher_id = %publisher_id, "Feed ended, lock released");
                            }
                            feeds.remove(&key);
                        }
                        self.diagnostics
                            .report(ListenerDiagnostic::StreamClosed { channel });
                    }
                },
            }
        }

        debug!(responder_id = %self.responder_id, "Signal listener stopped");
    }

    async fn handle_message(
        &self,
        key: &FeedKey,
        bytes: &[u8],
        feeds: &mut StreamMap<FeedKey, Feed>,
    ) {
        let signal = match Signal::decode(bytes) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(channel = %key.channel(), error = %e, "Malformed signal");
                self.diagnostics.report(ListenerDiagnostic::MalformedMessage {
                    channel: key.channel(),
                    error: e.to_string(),
                });
                return;
            }
        };

        match key {
            FeedKey::Announce => {
                if signal.is_shutdown() {
                    let publisher_id = signal.publisher_id().clone();
                    let was_announced = self.shared.announced.write().remove(&publisher_id);
                    let was_locked = self.shared.locks.write().remove(&publisher_id);
                    if was_locked {
                        info!(publisher_id = %publisher_id, "Publisher shut down, lock released");
                    }
                    if was_announced || was_locked {
                        feeds.remove(&FeedKey::Publisher(publisher_id.clone()));
                        self.shared.closed.write().insert(publisher_id);
                    }
                } else if signal.is_initialization() {
                    self.shared
                        .announced
                        .write()
                        .insert(signal.publisher_id().clone());
                } else {
                    debug!(
                        event = %signal.event(),
                        "Non-announcement signal on announce channel ignored"
                    );
                    return;
                }
            }
            FeedKey::Publisher(publisher_id) => {
                if signal.publisher_id() != publisher_id {
                    warn!(
                        channel = %key.channel(),
                        publisher_id = %signal.publisher_id(),
                        "Signal from another publisher ignored"
                    );
                    self.diagnostics
                        .report(ListenerDiagnostic::MismatchedPublisher {
                            channel: key.channel(),
                            publisher_id: signal.publisher_id().clone(),
                        });
                    return;
                }
                if !self.shared.tag_allows(&signal) {
                    debug!(
                        event = %signal.event(),
                        tag = %signal.tag(),
                        "Signal filtered by tag lock"
                    );
                    return;
                }
            }
        }

        debug!(
            publisher_id = %signal.publisher_id(),
            event = %signal.event(),
            "Dispatching signal"
        );
        self.handler.on_signal(signal).await;
    }
}
