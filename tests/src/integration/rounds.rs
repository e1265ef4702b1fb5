//! # Response Rounds
//!
//! `publish_signal` with registered responders: success, failure, timeouts,
//! snapshots and tag locks.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use shared_bus::MessageBus;
    use state_signals::channels::signal_channel;
    use state_signals::{
        InitializeOptions, PublishOptions, RasCode, ResponderConfig, ResultCode, Signal,
        SignalError, ValidationError, WaitOptions,
    };
    use tokio::time::Instant;

    use crate::fixtures::{
        bus, exporter, raw_register, raw_response, spawn_responder, spawn_responder_with,
        Behavior,
    };

    const TIMEOUT: Duration = Duration::from_millis(1000);

    async fn ready(
        exporter: &state_signals::SignalExporter,
        legal: &[&str],
        responders: usize,
    ) {
        let code = exporter
            .initialize_and_wait(
                legal.iter().copied(),
                InitializeOptions::default(),
                WaitOptions::new(responders, Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(code, ResultCode::AllSubsSuccess);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_answered_within_timeout() {
        let bus = bus();
        let responder = spawn_responder(&bus, "R", |_| {
            Behavior::succeed_after(Duration::from_millis(200))
        });
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let started = Instant::now();
        let report = exporter
            .publish_signal("ping", PublishOptions::default().with_timeout(TIMEOUT))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.len(), 1);
        let status = report.get(responder.id().as_str()).unwrap();
        assert_eq!(status.ras_code(), Some(RasCode::SUCCESS));
        assert_eq!(status.payload(), Some(&json!("I did it!")));
        assert_eq!(report.result_code(), ResultCode::AllSubsSuccess);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_responder_times_out() {
        let bus = bus();
        let responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let started = Instant::now();
        let report = exporter
            .publish_signal("ping", PublishOptions::default().with_timeout(TIMEOUT))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(report.get(responder.id().as_str()).unwrap().is_timed_out());
        assert_eq!(report.timed_out(), vec![responder.id()]);
        assert_eq!(report.result_code(), ResultCode::MissingResponse);
        assert!(elapsed >= TIMEOUT);
        assert!(elapsed < TIMEOUT + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_deadline_is_discarded() {
        let bus = bus();
        let responder = spawn_responder(&bus, "R", |_| {
            Behavior::succeed_after(TIMEOUT + Duration::from_millis(500))
        });
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let report = exporter
            .publish_signal("ping", PublishOptions::default().with_timeout(TIMEOUT))
            .await
            .unwrap();
        assert!(report.get(responder.id().as_str()).unwrap().is_timed_out());
        assert_eq!(report.result_code(), ResultCode::MissingResponse);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = exporter.collector_stats();
        assert_eq!(stats.late_responses, 1);
        assert_eq!(stats.rounds_timed_out, 1);
        assert_eq!(stats.unexpected_responses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_tag_yields_sub_failed() {
        let bus = bus();
        let _responder = spawn_responder(&bus, "fakeresp", |signal: &Signal| {
            if signal.tag() == "bad" {
                Behavior::immediate(RasCode::FAILURE)
            } else {
                Behavior::immediate(RasCode::SUCCESS)
            }
        });
        let exporter = exporter(&bus);
        ready(&exporter, &["benchmark-start", "benchmark-stop"], 1).await;

        let report = exporter
            .publish_signal(
                "benchmark-start",
                PublishOptions::default().with_payload(json!({"something": "cool info"})),
            )
            .await
            .unwrap();
        assert_eq!(report.result_code(), ResultCode::AllSubsSuccess);

        let report = exporter
            .publish_signal(
                "benchmark-stop",
                PublishOptions::default()
                    .with_tag("bad")
                    .with_payload(json!({"tool": "give bad resp"})),
            )
            .await
            .unwrap();
        assert_eq!(report.result_code(), ResultCode::SubFailed);
        assert!(report
            .replies()
            .values()
            .any(|status| status.payload() == Some(&json!("I messed up!"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_subscriber_reported_missing() {
        let bus = bus();
        let _responder = spawn_responder(&bus, "fakeresp", |_| {
            Behavior::immediate(RasCode::SUCCESS)
        });
        let exporter = exporter(&bus);
        ready(&exporter, &["benchmark-start"], 1).await;
        raw_register(&bus, exporter.publisher_id(), "fake").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = exporter
            .publish_signal(
                "benchmark-start",
                PublishOptions::default().with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.get("fake").unwrap().is_timed_out());
        assert_eq!(report.result_code(), ResultCode::MissingResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_excludes_responders_admitted_during_wait() {
        let bus = bus();
        let early = spawn_responder(&bus, "early", |_| {
            Behavior::succeed_after(Duration::from_millis(300))
        });
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let latecomer = {
            let bus = bus.clone();
            let publisher_id = exporter.publisher_id().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                raw_register(&bus, &publisher_id, "latecomer").await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                raw_response(&bus, &publisher_id, "latecomer", "ping", Some(RasCode::SUCCESS))
                    .await;
            })
        };

        let report = exporter
            .publish_signal("ping", PublishOptions::default().with_timeout(TIMEOUT))
            .await
            .unwrap();
        latecomer.await.unwrap();

        assert_eq!(report.len(), 1);
        assert!(report.get(early.id().as_str()).is_some());
        assert!(report.get("latecomer").is_none());
        assert_eq!(exporter.subscriber_count(), 2);
        assert_eq!(exporter.collector_stats().unexpected_responses, 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_publish() {
        let bus = bus();
        let _responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let mut signals = bus.subscribe(&signal_channel(exporter.publisher_id())).unwrap();
        let report = exporter
            .publish_signal("ping", PublishOptions::fire_and_forget().with_sample_no(7))
            .await
            .unwrap();
        assert!(!report.awaited());
        assert!(report.is_empty());

        let signal = Signal::decode(&signals.recv().await.unwrap()).unwrap();
        assert!(!signal.awaits_response());
        assert_eq!(signal.sample_no(), 7);
        assert_eq!(signal.process_name(), "fakemark");
    }

    #[tokio::test]
    async fn test_illegal_event_is_rejected() {
        let bus = bus();
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 0).await;

        let err = exporter
            .publish_signal("pong", PublishOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Event pong not one of legal events: ['ping']"
        );
    }

    #[tokio::test]
    async fn test_respond_without_ras_code_is_rejected() {
        let bus = bus();
        let responder = spawn_responder(&bus, "R", |_| Behavior::Silent);
        let exporter = exporter(&bus);
        ready(&exporter, &["ping"], 1).await;

        let err = responder
            .responder
            .respond(exporter.publisher_id(), "ping", None, json!("no code"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::Validation(ValidationError::MissingRasCode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_locked_responder_only_answers_matching_signals() {
        let bus = bus();
        let _locked = spawn_responder_with(
            &bus,
            ResponderConfig::new("fakeresp").with_lock_tag("locked"),
            |_| Behavior::immediate(RasCode::SUCCESS),
        );
        let exporter = exporter(&bus);
        ready(&exporter, &["benchmark-start"], 1).await;

        let report = exporter
            .publish_signal(
                "benchmark-start",
                PublishOptions::default().with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(report.result_code(), ResultCode::MissingResponse);

        let report = exporter
            .publish_signal(
                "benchmark-start",
                PublishOptions::default()
                    .with_tag("locked")
                    .with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(report.result_code(), ResultCode::AllSubsSuccess);
    }
}
