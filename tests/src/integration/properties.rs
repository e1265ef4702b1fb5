//! # Lifecycle Properties
//!
//! Property-based checks over arbitrary legal-event sets.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use state_signals::{is_reserved, ExporterState, InitializeOptions, PublishOptions, SignalError};

    use crate::fixtures::{bus, exporter};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_initialize_succeeds_exactly_once(
            events in proptest::collection::vec("[a-z][a-z0-9-]{0,12}", 1..6)
        ) {
            prop_assume!(events.iter().all(|e| !is_reserved(e)));

            let outcome: Result<(), TestCaseError> = runtime().block_on(async {
                let bus = bus();
                let exporter = exporter(&bus);

                exporter
                    .initialize(events.clone(), InitializeOptions::default())
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(exporter.state(), ExporterState::Active);

                let second = exporter
                    .initialize(events.clone(), InitializeOptions::default())
                    .await;
                prop_assert!(
                    matches!(second, Err(SignalError::State { .. })),
                    "second initialize must fail"
                );

                for event in &events {
                    let report = exporter
                        .publish_signal(event, PublishOptions::fire_and_forget())
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    prop_assert!(report.is_empty());
                }
                Ok(())
            });
            outcome?;
        }

        #[test]
        fn prop_undeclared_events_are_rejected(
            declared in "[a-z]{1,8}",
            other in "[a-z]{1,8}",
        ) {
            prop_assume!(declared != other && !is_reserved(&declared) && !is_reserved(&other));

            let outcome: Result<(), TestCaseError> = runtime().block_on(async {
                let bus = bus();
                let exporter = exporter(&bus);
                exporter
                    .initialize([declared.as_str()], InitializeOptions::default())
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                let result = exporter
                    .publish_signal(&other, PublishOptions::fire_and_forget())
                    .await;
                prop_assert!(
                    matches!(result, Err(SignalError::Validation(_))),
                    "undeclared event accepted"
                );
                Ok(())
            });
            outcome?;
        }
    }
}
