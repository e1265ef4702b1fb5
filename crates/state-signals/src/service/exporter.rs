//! Signal Exporter - the publisher side of the protocol.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize──→ Initializing ──→ Active ──shutdown──→ ShuttingDown ──→ Terminal
//!       ↑                            │
//!       └──── transport failure ─────┘
//! ```
//!
//! Each transition happens once. While Active, a background listener on
//! `event-signal-response:<publisher_id>` admits responders answering
//! `initialization` and feeds every other response into the collector.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use shared_bus::{MessageBus, MessageStream, SubscriptionError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::diagnostics::{Diagnostics, ListenerDiagnostic};
use crate::channels::{response_channel, signal_channel, ANNOUNCE_CHANNEL};
use crate::config::ExporterConfig;
use crate::domain::{
    Admission, CollectorStatsSnapshot, LegalEvents, Offer, PublishReport, PublisherId,
    ResponderId, Response, ResponseCollector, ResultCode, Signal, SignalContent, SignalOrigin,
    SubscriberRegistry, DEFAULT_SAMPLE_NO, INITIALIZATION, SHUTDOWN,
};
use crate::error::{Result, SignalError, ValidationError};

/// Exporter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExporterState {
    Uninitialized,
    Initializing,
    Active,
    ShuttingDown,
    Terminal,
}

impl ExporterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Active => "Active",
            Self::ShuttingDown => "ShuttingDown",
            Self::Terminal => "Terminal",
        }
    }
}

impl fmt::Display for ExporterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for `initialize`
#[derive(Debug, Clone, Default)]
pub struct InitializeOptions {
    pub tag: Option<String>,
    pub payload: Value,
    /// Responders registered up front; they are awaited in every round.
    pub expected_responders: Vec<ResponderId>,
}

impl InitializeOptions {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_expected_responders<I, R>(mut self, responders: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ResponderId>,
    {
        self.expected_responders = responders.into_iter().map(Into::into).collect();
        self
    }
}

/// Options for `publish_signal`
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub sample_no: i64,
    pub tag: Option<String>,
    pub payload: Value,
    /// Wait for one response per registered responder.
    pub await_responses: bool,
    /// Response wait; the configured default when `None`.
    pub timeout: Option<Duration>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            sample_no: DEFAULT_SAMPLE_NO,
            tag: None,
            payload: Value::Null,
            await_responses: true,
            timeout: None,
        }
    }
}

impl PublishOptions {
    /// Publish without waiting for responses.
    pub fn fire_and_forget() -> Self {
        Self {
            await_responses: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_sample_no(mut self, sample_no: i64) -> Self {
        self.sample_no = sample_no;
        self
    }
}

/// Options for `shutdown`
#[derive(Debug, Clone, Default)]
pub struct ShutdownOptions {
    pub tag: Option<String>,
    pub payload: Value,
    /// Ignored: the shutdown signal never awaits responses.
    pub awaits_response: bool,
}

/// Options for `initialize_and_wait`
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Registry size to wait for.
    pub responder_count: usize,
    pub timeout: Duration,
    /// Re-announce `initialization` every `republish_interval` while waiting.
    pub periodic: bool,
}

impl WaitOptions {
    pub fn new(responder_count: usize, timeout: Duration) -> Self {
        Self {
            responder_count,
            timeout,
            periodic: false,
        }
    }

    pub fn periodic(mut self) -> Self {
        self.periodic = true;
        self
    }
}

struct ListenerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Publisher endpoint of the protocol
pub struct SignalExporter {
    bus: Arc<dyn MessageBus>,
    config: ExporterConfig,
    origin: SignalOrigin,
    state: Mutex<ExporterState>,
    legal_events: RwLock<Option<LegalEvents>>,
    registry: Arc<SubscriberRegistry>,
    collector: Arc<ResponseCollector>,
    listener: Mutex<Option<ListenerHandle>>,
    diagnostics: Diagnostics,
}

impl SignalExporter {
    /// Create an exporter with a freshly generated publisher id.
    pub fn new(bus: Arc<dyn MessageBus>, config: ExporterConfig) -> Result<Self> {
        config.validate()?;

        let origin = SignalOrigin {
            publisher_id: PublisherId::generate(&config.process_name),
            process_name: config.process_name.clone(),
            runner_host: config.runner_host.clone(),
        };
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);

        debug!(publisher_id = %origin.publisher_id, "Created signal exporter");

        Ok(Self {
            bus,
            config,
            origin,
            state: Mutex::new(ExporterState::Uninitialized),
            legal_events: RwLock::new(None),
            registry: Arc::new(SubscriberRegistry::new()),
            collector: Arc::new(ResponseCollector::new()),
            listener: Mutex::new(None),
            diagnostics,
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Declare the legal events, start admitting responders and announce the
    /// session on the announce channel.
    ///
    /// On a transport failure the exporter returns to `Uninitialized` and the
    /// call may be retried.
    pub async fn initialize<I, S>(&self, legal_events: I, options: InitializeOptions) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let legal = {
            let mut state = self.state.lock();
            if *state != ExporterState::Uninitialized {
                return Err(SignalError::state("initialize", state.as_str()));
            }
            let legal = LegalEvents::new(legal_events)?;
            if options
                .expected_responders
                .iter()
                .any(|id| id.as_str().is_empty())
            {
                return Err(ValidationError::EmptyIdentifier.into());
            }
            *state = ExporterState::Initializing;
            legal
        };

        if let Err(e) = self.start_session(&legal, &options).await {
            self.stop_listener().await;
            *self.state.lock() = ExporterState::Uninitialized;
            warn!(
                publisher_id = %self.origin.publisher_id,
                error = %e,
                "Initialization failed"
            );
            return Err(e);
        }

        for responder in options.expected_responders {
            self.registry.admit(responder);
        }
        *self.legal_events.write() = Some(legal.clone());
        *self.state.lock() = ExporterState::Active;

        info!(
            publisher_id = %self.origin.publisher_id,
            legal_events = %legal,
            expected = self.registry.len(),
            "Exporter initialized"
        );
        Ok(())
    }

    async fn start_session(&self, legal: &LegalEvents, options: &InitializeOptions) -> Result<()> {
        let channel = response_channel(&self.origin.publisher_id);
        let stream = self.bus.subscribe(&channel)?.into_stream();

        let (stop_tx, stop_rx) = oneshot::channel();
        let listener = ResponseListener {
            publisher_id: self.origin.publisher_id.clone(),
            channel,
            registry: Arc::clone(&self.registry),
            collector: Arc::clone(&self.collector),
            diagnostics: self.diagnostics.clone(),
        };
        let task = tokio::spawn(listener.run(stream, stop_rx));
        *self.listener.lock() = Some(ListenerHandle {
            stop: stop_tx,
            task,
        });

        debug!(legal_events = %legal, "Announcing initialization");
        self.announce(INITIALIZATION, options.tag.clone(), options.payload.clone())
            .await?;
        Ok(())
    }

    /// `initialize`, then wait until at least `responder_count` responders
    /// registered or the timeout elapsed.
    ///
    /// Returns `AllSubsSuccess` when the count was reached and `SubFailed`
    /// otherwise. The exporter stays Active either way.
    pub async fn initialize_and_wait<I, S>(
        &self,
        legal_events: I,
        options: InitializeOptions,
        wait: WaitOptions,
    ) -> Result<ResultCode>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag = options.tag.clone();
        let payload = options.payload.clone();
        self.initialize(legal_events, options).await?;

        let mut size_rx = self.registry.watch_len();
        let deadline = tokio::time::sleep(wait.timeout);
        tokio::pin!(deadline);

        let interval = self.config.republish_interval;
        let mut republish = tokio::time::interval_at(Instant::now() + interval, interval);
        republish.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let registered = *size_rx.borrow_and_update();
            if registered >= wait.responder_count {
                info!(registered, "Expected responders registered");
                return Ok(ResultCode::AllSubsSuccess);
            }

            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        registered,
                        expected = wait.responder_count,
                        "Timed out waiting for responders"
                    );
                    return Ok(ResultCode::SubFailed);
                }
                changed = size_rx.changed() => {
                    if changed.is_err() {
                        return Ok(ResultCode::SubFailed);
                    }
                }
                _ = republish.tick(), if wait.periodic => {
                    if self.state() != ExporterState::Active {
                        return Err(SignalError::ShutdownInProgress);
                    }
                    debug!("Re-announcing initialization");
                    if let Err(e) = self.announce(INITIALIZATION, tag.clone(), payload.clone()).await {
                        warn!(error = %e, "Failed to re-announce initialization");
                    }
                }
            }
        }
    }

    /// Publish a legal event and, unless fire-and-forget, collect one response
    /// per responder registered at call time.
    pub async fn publish_signal(&self, event: &str, options: PublishOptions) -> Result<PublishReport> {
        let state = self.state();
        if state != ExporterState::Active {
            return Err(SignalError::state("publish_signal", state.as_str()));
        }
        if let Some(legal) = self.legal_events.read().as_ref() {
            legal.check(event)?;
        }

        let signal = Signal::new(
            &self.origin,
            event,
            SignalContent {
                sample_no: options.sample_no,
                tag: options.tag,
                payload: options.payload,
                awaits_response: options.await_responses,
            },
        )?;
        let bytes = signal.encode()?;
        let channel = signal_channel(&self.origin.publisher_id);

        if !options.await_responses {
            let receivers = self.bus.publish(&channel, bytes).await?;
            debug!(event, receivers, "Published signal");
            return Ok(PublishReport::fire_and_forget(event));
        }

        // Open the round before publishing so fast responses are not missed
        let expected = self.registry.snapshot();
        let awaiting = expected.len();
        let round = self.collector.open(event, expected)?;

        let started = Instant::now();
        match self.bus.publish(&channel, bytes).await {
            Ok(receivers) => debug!(event, receivers, awaiting, "Published signal"),
            Err(e) => {
                self.collector.discard(round.id());
                return Err(e.into());
            }
        }

        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let replies = self.collector.wait(round, timeout).await?;
        let report = PublishReport::collected(event, replies, started.elapsed());

        match report.result_code() {
            ResultCode::AllSubsSuccess => {
                info!(event, responders = report.len(), "All responders succeeded")
            }
            ResultCode::SubFailed => warn!(event, "A responder reported failure"),
            ResultCode::MissingResponse => warn!(
                event,
                missing = report.timed_out().len(),
                "Responders did not answer in time"
            ),
        }
        Ok(report)
    }

    /// End the session: abort in-flight rounds, stop admitting, wipe the
    /// registry and announce `shutdown`.
    ///
    /// The exporter ends up Terminal even when the announcement fails; the
    /// transport error is still returned.
    pub async fn shutdown(&self, options: ShutdownOptions) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ExporterState::Active {
                return Err(SignalError::state("shutdown", state.as_str()));
            }
            *state = ExporterState::ShuttingDown;
        }
        // Before any await: rounds racing this call must not complete normally
        let aborted = self.collector.abort_all();
        if options.awaits_response {
            warn!("Shutdown signals never await responses, ignoring awaits_response");
        }

        self.stop_listener().await;
        let removed = self.registry.seal();

        let announced = self.announce(SHUTDOWN, options.tag, options.payload).await;
        *self.state.lock() = ExporterState::Terminal;

        info!(
            publisher_id = %self.origin.publisher_id,
            removed,
            aborted,
            "Exporter shut down"
        );
        announced.map(|_| ())
    }

    /// Publish a reserved event on the announce channel.
    async fn announce(&self, event: &str, tag: Option<String>, payload: Value) -> Result<usize> {
        let signal = Signal::new(
            &self.origin,
            event,
            SignalContent {
                tag,
                payload,
                ..SignalContent::default()
            },
        )?;
        let receivers = self.bus.publish(ANNOUNCE_CHANNEL, signal.encode()?).await?;
        debug!(event, receivers, "Announced");
        Ok(receivers)
    }

    async fn stop_listener(&self) {
        let handle = self.listener.lock().take();
        let Some(ListenerHandle { stop, task }) = handle else {
            return;
        };
        // The task may have exited on its own
        let _ = stop.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "Response listener task failed");
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    pub fn state(&self) -> ExporterState {
        *self.state.lock()
    }

    pub fn publisher_id(&self) -> &PublisherId {
        &self.origin.publisher_id
    }

    pub fn process_name(&self) -> &str {
        &self.origin.process_name
    }

    pub fn runner_host(&self) -> &str {
        &self.origin.runner_host
    }

    /// The declared legal events, once initialized.
    pub fn legal_events(&self) -> Option<LegalEvents> {
        self.legal_events.read().clone()
    }

    /// Registered responders in sorted order.
    pub fn subscribers(&self) -> Vec<ResponderId> {
        self.registry.members()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Receive listener diagnostics from now on.
    pub fn diagnostics(&self) -> broadcast::Receiver<ListenerDiagnostic> {
        self.diagnostics.subscribe()
    }

    pub fn collector_stats(&self) -> CollectorStatsSnapshot {
        self.collector.stats().snapshot()
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }
}

impl Drop for SignalExporter {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            let _ = handle.stop.send(());
        }
    }
}

impl fmt::Debug for SignalExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalExporter")
            .field("publisher_id", &self.origin.publisher_id)
            .field("state", &self.state())
            .field("subscribers", &self.registry.len())
            .finish()
    }
}

// =============================================================================
// RESPONSE LISTENER
// =============================================================================

struct ResponseListener {
    publisher_id: PublisherId,
    channel: String,
    registry: Arc<SubscriberRegistry>,
    collector: Arc<ResponseCollector>,
    diagnostics: Diagnostics,
}

impl ResponseListener {
    async fn run(self, mut stream: MessageStream, mut stop: oneshot::Receiver<()>) {
        debug!(channel = %self.channel, "Response listener started");

        loop {
            tokio::select! {
                _ = &mut stop => break,
                next = stream.next() => match next {
                    Some(Ok(bytes)) => self.handle_message(&bytes),
                    Some(Err(SubscriptionError::Lagged(skipped))) => {
                        warn!(channel = %self.channel, skipped, "Response listener lagged");
                        self.diagnostics.report(ListenerDiagnostic::Lagged {
                            channel: self.channel.clone(),
                            skipped,
                        });
                    }
                    Some(Err(SubscriptionError::Closed)) | None => {
                        warn!(channel = %self.channel, "Response stream ended");
                        self.diagnostics.report(ListenerDiagnostic::StreamClosed {
                            channel: self.channel.clone(),
                        });
                        break;
                    }
                },
            }
        }

        debug!(channel = %self.channel, "Response listener stopped");
    }

    fn handle_message(&self, bytes: &[u8]) {
        let response = match Response::decode(bytes) {
            Ok(response) => response,
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Malformed response");
                self.diagnostics.report(ListenerDiagnostic::MalformedMessage {
                    channel: self.channel.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        if response.publisher_id() != &self.publisher_id {
            warn!(
                publisher_id = %response.publisher_id(),
                "Response addressed to another publisher"
            );
            self.diagnostics.report(ListenerDiagnostic::ForeignPublisher {
                publisher_id: response.publisher_id().clone(),
            });
            return;
        }

        if response.is_initialization() {
            match self.registry.admit(response.responder_id().clone()) {
                Admission::Admitted => info!(
                    responder_id = %response.responder_id(),
                    "Responder registered"
                ),
                Admission::AlreadyPresent => debug!(
                    responder_id = %response.responder_id(),
                    "Responder already registered"
                ),
                Admission::Sealed => debug!(
                    responder_id = %response.responder_id(),
                    "Registration after shutdown ignored"
                ),
            }
            return;
        }

        match self.collector.offer(&response) {
            Offer::Accepted(round) => debug!(
                round,
                event = %response.event(),
                responder_id = %response.responder_id(),
                ras_code = ?response.ras_code(),
                "Response collected"
            ),
            Offer::Unexpected => warn!(
                event = %response.event(),
                responder_id = %response.responder_id(),
                "Response from a responder not awaited (unknown or already answered)"
            ),
            Offer::NoOpenRound => debug!(
                event = %response.event(),
                responder_id = %response.responder_id(),
                "Late or unsolicited response discarded"
            ),
        }
    }
}
