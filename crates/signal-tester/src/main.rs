//! # Signal Tester
//!
//! Runs a complete exporter/responder session in one process:
//!
//! 1. The exporter `fakemark` announces itself and re-announces every second
//! 2. The responder `fakeresp` starts late, answers the announcement and locks on
//! 3. `benchmark-start` is acknowledged with success
//! 4. `benchmark-stop` tagged `bad` is acknowledged with failure
//! 5. The exporter shuts down and the responder releases its lock
//!
//! Configuration comes from the `SIGNALS_*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use shared_bus::{InMemoryMessageBus, MessageBus};
use state_signals::{
    init_logging, ChannelHandler, ExporterConfig, InitializeOptions, LoggingConfig,
    PublishOptions, RasCode, ResponderConfig, ShutdownOptions, Signal, SignalExporter,
    SignalResponder, WaitOptions,
};
use tracing::{info, warn};

/// Delay before the responder comes up, so only re-announcements reach it.
const RESPONDER_DELAY: Duration = Duration::from_millis(2500);

/// How long the exporter waits for its responder to register.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const LEGAL_EVENTS: [&str; 2] = ["benchmark-start", "benchmark-stop"];

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::from_env()).context("Failed to initialize logging")?;

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());

    let mut exporter_config = ExporterConfig::from_env();
    if std::env::var("SIGNALS_PROCESS_NAME").is_err() {
        exporter_config.process_name = "fakemark".to_string();
    }
    let exporter = SignalExporter::new(bus.clone(), exporter_config)
        .context("Failed to create exporter")?;

    let responder_task = tokio::spawn(run_responder(bus.clone()));

    info!("=== BENCHMARK INIT TEST ===");
    let code = exporter
        .initialize_and_wait(
            LEGAL_EVENTS,
            InitializeOptions::default(),
            WaitOptions::new(1, HANDSHAKE_TIMEOUT).periodic(),
        )
        .await?;
    info!(
        result_code = code.code(),
        subscribers = ?exporter.subscribers(),
        "Handshake finished"
    );

    info!("=== BENCHMARK START TEST ===");
    let report = exporter
        .publish_signal(
            "benchmark-start",
            PublishOptions::default().with_payload(json!({"something": "cool info"})),
        )
        .await?;
    info!(
        result_code = report.result_code().code(),
        replies = ?report.replies(),
        "Round finished"
    );

    info!("=== BENCHMARK STOP TEST ===");
    let report = exporter
        .publish_signal(
            "benchmark-stop",
            PublishOptions::default()
                .with_tag("bad")
                .with_payload(json!({"tool": "give bad resp"})),
        )
        .await?;
    info!(
        result_code = report.result_code().code(),
        replies = ?report.replies(),
        "Round finished"
    );

    info!("=== BENCHMARK SHUTDOWN TEST ===");
    exporter.shutdown(ShutdownOptions::default()).await?;
    info!(
        state = %exporter.state(),
        stats = ?exporter.collector_stats(),
        "Exporter no longer listening"
    );

    responder_task.abort();
    Ok(())
}

/// Start the responder after a delay and answer every signal it receives.
async fn run_responder(bus: Arc<dyn MessageBus>) -> Result<()> {
    tokio::time::sleep(RESPONDER_DELAY).await;

    let mut config = ResponderConfig::from_env();
    if std::env::var("SIGNALS_RESPONDER_NAME").is_err() {
        config.responder_name = "fakeresp".to_string();
    }
    let (handler, mut signals) = ChannelHandler::channel(16);
    let responder = SignalResponder::start(bus, config, Arc::new(handler))
        .context("Failed to start responder")?;

    while let Some(signal) = signals.recv().await {
        if let Err(e) = answer(&responder, &signal).await {
            warn!(event = %signal.event(), error = %e, "Failed to respond");
        }
    }
    responder.stop().await;
    Ok(())
}

async fn answer(responder: &SignalResponder, signal: &Signal) -> state_signals::Result<()> {
    info!(
        publisher_id = %signal.publisher_id(),
        event = %signal.event(),
        tag = %signal.tag(),
        "Received signal"
    );

    if signal.is_shutdown() {
        return Ok(());
    }
    if signal.is_initialization() {
        return responder.srespond(signal, None, Value::Null).await;
    }

    let (ras, message) = if signal.tag() == "bad" {
        (RasCode::FAILURE, "I messed up!")
    } else {
        (RasCode::SUCCESS, "I did it!")
    };
    responder.srespond(signal, Some(ras), json!(message)).await
}
