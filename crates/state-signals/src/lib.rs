//! # State Signals - Exporter/Responder Coordination Protocol
//!
//! Lets a long-running process (the exporter) announce lifecycle events to
//! any number of independent tools (responders) over a message bus, and
//! optionally wait, with a timeout, until every registered tool has
//! acknowledged each event.
//!
//! ## Protocol
//!
//! ```text
//! Exporter                         Bus                          Responder
//!    │ initialization ──→ event-signal-pubsub ──────────────────→ │
//!    │ ←───────────────── event-signal-response:<pid> ←── respond │ (locks on)
//!    │ ping (awaits) ───→ event-signal-pubsub:<pid> ────────────→ │
//!    │ ←───────────────── event-signal-response:<pid> ←─ RAS code │
//!    │ shutdown ────────→ event-signal-pubsub ──────────────────→ │ (releases)
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: wire entities, identities, registry and response collector
//! - **Ports**: [`SignalHandler`], the application's signal callback
//! - **Service**: [`SignalExporter`] and [`SignalResponder`] with their
//!   background listeners
//!
//! ## Example
//!
//! ```ignore
//! let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
//! let exporter = SignalExporter::new(bus.clone(), ExporterConfig::new("fakemark"))?;
//! exporter.initialize(["benchmark-start"], InitializeOptions::default()).await?;
//! let report = exporter
//!     .publish_signal("benchmark-start", PublishOptions::default())
//!     .await?;
//! exporter.shutdown(ShutdownOptions::default()).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod channels;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;
pub mod service;

// Re-export main types
pub use config::{ConfigError, ExporterConfig, LoggingConfig, ResponderConfig};
pub use domain::{
    is_reserved, CollectorStatsSnapshot, LegalEvents, PublishReport, PublisherId, RasCode, Reply,
    ReplyStatus, ResponderId, Response, ResultCode, Signal, INITIALIZATION, SHUTDOWN,
};
pub use error::{CodecError, Result, SignalError, ValidationError};
pub use logging::{init_logging, LoggingError};
pub use ports::{handler_fn, ChannelHandler, FnHandler, SignalHandler};
pub use service::{
    ExporterState, InitializeOptions, ListenerDiagnostic, PublishOptions, ShutdownOptions,
    SignalExporter, SignalResponder, WaitOptions,
};
