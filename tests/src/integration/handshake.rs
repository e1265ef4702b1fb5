//! # Handshake Flows
//!
//! Exporter announces `initialization`, responders answer and lock on, the
//! exporter's registry admits them.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::fixtures::{
        bus, exporter, exporter_with, raw_register, spawn_responder, wait_for_subscribers,
        Behavior,
    };
    use state_signals::{
        ExporterConfig, ExporterState, InitializeOptions, ResponderId, ResultCode, SignalError,
        ValidationError, WaitOptions,
    };

    const LEGAL: [&str; 2] = ["benchmark-start", "benchmark-stop"];

    #[tokio::test]
    async fn test_initialize_succeeds_once() {
        let bus = bus();
        let exporter = exporter(&bus);

        exporter
            .initialize(LEGAL, InitializeOptions::default())
            .await
            .unwrap();
        assert_eq!(exporter.state(), ExporterState::Active);
        assert_eq!(exporter.legal_events().unwrap().len(), 2);

        let err = exporter
            .initialize(LEGAL, InitializeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::State {
                operation: "initialize",
                state: "Active"
            }
        ));
    }

    #[tokio::test]
    async fn test_initialize_rejects_reserved_event_names() {
        let bus = bus();
        let exporter = exporter(&bus);

        let err = exporter
            .initialize(["benchmark-start", "initialization"], InitializeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::Validation(ValidationError::ReservedEvent(_))
        ));

        // Nothing was consumed; a valid set still initializes
        exporter
            .initialize(LEGAL, InitializeOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_responders_register_exactly_once() {
        let bus = bus();
        let responders: Vec<_> = (0..5)
            .map(|i| spawn_responder(&bus, &format!("tool-{}", i), |_| Behavior::Silent))
            .collect();

        let exporter = exporter_with(
            &bus,
            ExporterConfig::new("fakemark").with_republish_interval(Duration::from_millis(100)),
        );
        let code = exporter
            .initialize_and_wait(
                LEGAL,
                InitializeOptions::default(),
                WaitOptions::new(5, Duration::from_secs(5)).periodic(),
            )
            .await
            .unwrap();
        assert_eq!(code, ResultCode::AllSubsSuccess);

        // Duplicate init responses never double count
        let first = &responders[0];
        raw_register(&bus, exporter.publisher_id(), first.id().as_str()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(exporter.subscriber_count(), 5);

        let mut expected: Vec<ResponderId> = responders.iter().map(|r| r.id().clone()).collect();
        expected.sort();
        assert_eq!(exporter.subscribers(), expected);
        for responder in &responders {
            assert!(responder.responder.is_locked_on(exporter.publisher_id()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_responder_registers_through_periodic_announcement() {
        let bus = bus();
        let exporter = exporter_with(
            &bus,
            ExporterConfig::new("fakemark").with_republish_interval(Duration::from_millis(500)),
        );

        let late = {
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                spawn_responder(&bus, "fakeresp", |_| Behavior::Silent)
            })
        };

        let code = exporter
            .initialize_and_wait(
                LEGAL,
                InitializeOptions::default(),
                WaitOptions::new(1, Duration::from_secs(6)).periodic(),
            )
            .await
            .unwrap();
        let late = late.await.unwrap();

        assert_eq!(code, ResultCode::AllSubsSuccess);
        assert_eq!(exporter.subscribers(), vec![late.id().clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_and_wait_without_responders_times_out() {
        let bus = bus();
        let exporter = exporter(&bus);

        let code = exporter
            .initialize_and_wait(
                LEGAL,
                InitializeOptions::default(),
                WaitOptions::new(1, Duration::from_secs(6)).periodic(),
            )
            .await
            .unwrap();
        assert_eq!(code, ResultCode::SubFailed);
        assert_eq!(code.code(), 1);
        assert_eq!(exporter.state(), ExporterState::Active);
    }

    #[tokio::test]
    async fn test_expected_responders_seed_the_registry() {
        let bus = bus();
        let exporter = exporter(&bus);
        exporter
            .initialize(
                ["bla"],
                InitializeOptions::default().with_expected_responders(["testo"]),
            )
            .await
            .unwrap();
        assert_eq!(exporter.subscribers(), vec![ResponderId::from("testo")]);
    }

    #[tokio::test]
    async fn test_responder_locks_onto_several_exporters() {
        let bus = bus();
        let responder = spawn_responder(&bus, "shared-tool", |_| Behavior::Silent);
        let first = exporter(&bus);
        let second = exporter(&bus);

        first
            .initialize(LEGAL, InitializeOptions::default())
            .await
            .unwrap();
        second
            .initialize(["other-event"], InitializeOptions::default())
            .await
            .unwrap();

        assert!(wait_for_subscribers(&first, 1).await);
        assert!(wait_for_subscribers(&second, 1).await);
        assert_eq!(first.subscribers(), vec![responder.id().clone()]);
        assert_eq!(second.subscribers(), vec![responder.id().clone()]);

        let locked = responder.responder.locked_publishers();
        assert_eq!(locked.len(), 2);
        assert!(locked.contains(first.publisher_id()));
        assert!(locked.contains(second.publisher_id()));
    }
}
