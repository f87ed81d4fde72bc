//! Property-based tests for the sanitizer and the job lifecycle rules.
//!
//! The sanitizer properties run over arbitrary nested JSON. The lifecycle
//! properties drive the in-memory store through random operation sequences
//! and check that terminal jobs never change and the retry counter stays
//! within its bound.

use chrono::Utc;
use courier_core::{
    models::{Job, JobStatus, RequestId, Resolution},
    storage::{JobStore, MemoryJobStore, UpdateOutcome},
    Sanitizer,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("ssn".to_string()),
        Just("password".to_string()),
        Just("secret".to_string()),
        "[a-z]{1,6}",
    ]
}

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ \ta-z]{0,8}".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map(key_strategy(), inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn assert_clean(value: &Value, sanitizer: &Sanitizer) -> Result<(), TestCaseError> {
    match value {
        Value::String(s) => {
            prop_assert_eq!(s.trim(), s.as_str());
        },
        Value::Array(items) => {
            for item in items {
                assert_clean(item, sanitizer)?;
            }
        },
        Value::Object(map) => {
            for (key, child) in map {
                prop_assert!(!sanitizer.is_sensitive(key), "sensitive key {} survived", key);
                assert_clean(child, sanitizer)?;
            }
        },
        _ => {},
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Begin,
    Complete,
    Fail,
    Retry,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Begin),
        Just(Operation::Complete),
        Just(Operation::Fail),
        Just(Operation::Retry),
    ]
}

proptest! {
    /// Sanitizing twice gives the same document as sanitizing once.
    #[test]
    fn sanitizer_is_idempotent(value in json_strategy()) {
        let sanitizer = Sanitizer::default();
        let once = sanitizer.sanitize(&value);
        let twice = sanitizer.sanitize(&once);
        prop_assert_eq!(once, twice);
    }

    /// No sensitive key or untrimmed string survives at any depth.
    #[test]
    fn sanitizer_output_is_clean(value in json_strategy()) {
        let sanitizer = Sanitizer::default();
        let cleaned = sanitizer.sanitize(&value);
        assert_clean(&cleaned, &sanitizer)?;
    }

    /// Terminal jobs are frozen and the retry counter never exceeds its bound.
    #[test]
    fn terminal_jobs_never_change(
        operations in prop::collection::vec(operation_strategy(), 1..24),
        max_retries in 1u32..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryJobStore::new();
            let request_id = RequestId::new();
            store.create(Job::new(request_id.clone(), json!({"n": 1}), Utc::now())).await.unwrap();

            let mut frozen: Option<Job> = None;

            for operation in operations {
                let now = Utc::now();
                let outcome = match operation {
                    Operation::Begin => store.begin_attempt(&request_id, "sync", now).await,
                    Operation::Complete => {
                        let resolution = Resolution::Complete { result: json!({"ok": true}) };
                        store.finalize(&request_id, resolution, now).await
                    },
                    Operation::Fail => {
                        let resolution = Resolution::Failed { error_message: "boom".into() };
                        store.finalize(&request_id, resolution, now).await
                    },
                    Operation::Retry => store.record_retry(&request_id, max_retries, now).await,
                }
                .unwrap();

                let job = store.find(&request_id).await.unwrap().unwrap();
                prop_assert!(job.retry_count <= max_retries);

                if let Some(expected) = &frozen {
                    prop_assert_eq!(&outcome, &UpdateOutcome::AlreadyFinalized(expected.clone()));
                    prop_assert_eq!(&job, expected);
                } else if job.is_terminal() {
                    match job.status {
                        JobStatus::Complete => {
                            prop_assert!(job.result.is_some() && job.error_message.is_none());
                        },
                        _ => prop_assert!(job.error_message.is_some() && job.result.is_none()),
                    }
                    frozen = Some(job);
                }
            }

            Ok(())
        })?;
    }
}
