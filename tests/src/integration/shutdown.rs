//! # Shutdown Flows
//!
//! Session teardown, races with in-flight rounds, late registrations and
//! transport failures.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use shared_bus::MessageBus;
    use state_signals::channels::ANNOUNCE_CHANNEL;
    use state_signals::{
        ExporterState, InitializeOptions, PublishOptions, ResultCode, ShutdownOptions, Signal,
        SignalError, ValidationError, WaitOptions,
    };

    use crate::fixtures::{bus, exporter, raw_register, spawn_responder, Behavior};

    async fn active_with_responders(
        bus: &Arc<shared_bus::InMemoryMessageBus>,
        count: usize,
    ) -> Arc<state_signals::SignalExporter> {
        let exporter = exporter(bus);
        let code = exporter
            .initialize_and_wait(
                ["ping"],
                InitializeOptions::default(),
                WaitOptions::new(count, Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(code, ResultCode::AllSubsSuccess);
        exporter
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry_and_announces() {
        let bus = bus();
        let mut announce = bus.subscribe(ANNOUNCE_CHANNEL).unwrap();
        let responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = active_with_responders(&bus, 1).await;
        assert!(responder.responder.is_locked_on(exporter.publisher_id()));

        exporter
            .shutdown(ShutdownOptions {
                tag: Some("done".to_string()),
                payload: Value::Null,
                awaits_response: true,
            })
            .await
            .unwrap();

        assert_eq!(exporter.state(), ExporterState::Terminal);
        assert_eq!(exporter.subscriber_count(), 0);

        let init = Signal::decode(&announce.recv().await.unwrap()).unwrap();
        assert!(init.is_initialization());
        let shutdown = Signal::decode(&announce.recv().await.unwrap()).unwrap();
        assert!(shutdown.is_shutdown());
        assert!(!shutdown.awaits_response());
        assert_eq!(shutdown.tag(), "done");

        let err = exporter
            .publish_signal("ping", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::State {
                operation: "publish_signal",
                state: "Terminal"
            }
        ));

        // The responder sees the announcement and releases its lock
        let publisher_id = exporter.publisher_id().clone();
        let released = tokio::time::timeout(Duration::from_secs(1), async {
            while responder.responder.is_locked_on(&publisher_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_outside_active_is_a_state_error() {
        let bus = bus();
        let exporter = exporter(&bus);
        assert!(matches!(
            exporter.shutdown(ShutdownOptions::default()).await,
            Err(SignalError::State { .. })
        ));

        exporter
            .initialize(["ping"], InitializeOptions::default())
            .await
            .unwrap();
        exporter.shutdown(ShutdownOptions::default()).await.unwrap();
        assert!(matches!(
            exporter.shutdown(ShutdownOptions::default()).await,
            Err(SignalError::State { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_in_flight_publish() {
        let bus = bus();
        let _responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = active_with_responders(&bus, 1).await;

        let in_flight = {
            let exporter = Arc::clone(&exporter);
            tokio::spawn(async move {
                exporter
                    .publish_signal(
                        "ping",
                        PublishOptions::default().with_timeout(Duration::from_secs(30)),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        exporter.shutdown(ShutdownOptions::default()).await.unwrap();
        let outcome = in_flight.await.unwrap();
        assert!(matches!(outcome, Err(SignalError::ShutdownInProgress)));
        assert_eq!(exporter.collector_stats().rounds_aborted, 1);
    }

    #[tokio::test]
    async fn test_registration_after_shutdown_is_ignored() {
        let bus = bus();
        let exporter = active_with_responders(&bus, 0).await;
        let publisher_id = exporter.publisher_id().clone();
        exporter.shutdown(ShutdownOptions::default()).await.unwrap();

        raw_register(&bus, &publisher_id, "too-late").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(exporter.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_responder_refuses_to_lock_onto_shut_down_publisher() {
        let bus = bus();
        let responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = active_with_responders(&bus, 1).await;
        let publisher_id = exporter.publisher_id().clone();
        exporter.shutdown(ShutdownOptions::default()).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match responder
                    .responder
                    .respond(&publisher_id, "initialization", None, Value::Null)
                    .await
                {
                    Err(err) => return err,
                    // Shutdown announcement not processed yet
                    Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            SignalError::Validation(ValidationError::PublisherShutDown(_))
        ));
        assert_eq!(exporter.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_bus_surfaces_transport_errors() {
        let bus = bus();
        let exporter = active_with_responders(&bus, 0).await;
        bus.close();

        let err = exporter
            .publish_signal("ping", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Transport(_)));

        let err = exporter
            .publish_signal("ping", PublishOptions::fire_and_forget())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Transport(_)));
        assert_eq!(exporter.state(), ExporterState::Active);

        // Shutdown still completes locally and reports the failed announcement
        let err = exporter
            .shutdown(ShutdownOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Transport(_)));
        assert_eq!(exporter.state(), ExporterState::Terminal);
    }
}
