//! End-to-end tests for the dispatch engine against mock vendors.

use std::time::Duration;

use courier_core::{Clock, Job, JobQueue, JobStatus, Lease, Outcome, QueueMessage, Sanitizer};
use courier_dispatch::{
    DispatchConfig, DispatchEngine, DispatchError, RateLimit, Reconciler, Reconciliation,
    RetryDecision, RetryPolicy, RetryScheduler, VendorConfig, VendorMode,
};
use courier_testing::{JobBuilder, MockVendor, TestEnv};
use serde_json::json;

fn config(vendors: Vec<VendorConfig>) -> DispatchConfig {
    DispatchConfig {
        pop_timeout: Duration::from_millis(200),
        vendors,
        retention: None,
        ..Default::default()
    }
}

fn engine(env: &TestEnv, config: DispatchConfig) -> DispatchEngine {
    DispatchEngine::new(env.store_handle(), env.queue_handle(), config, env.clock_handle())
        .expect("engine should build")
}

fn sync_vendor(vendor: &MockVendor) -> VendorConfig {
    VendorConfig::new("sync", vendor.uri(), VendorMode::Sync)
}

/// Processes messages until the queue stays empty for one pop timeout.
async fn drain(engine: &DispatchEngine) {
    for _ in 0..20 {
        if !engine.process_next().await.expect("processing should succeed") {
            return;
        }
    }
    panic!("queue did not drain");
}

#[tokio::test]
async fn sync_success_completes_job_with_sanitized_result() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success(json!({"score": 700, "ssn": "123-45-6789", "note": " ok "})).await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({"customer": "c1"})).await;
    assert!(engine.process_next().await.unwrap());

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.vendor.as_deref(), Some("sync"));
    assert_eq!(job.result, Some(json!({"score": 700, "note": "ok"})));
    assert!(job.completed_at.is_some());
    assert!(job.vendor_response_received_at.is_some());

    let bodies = vendor.received_bodies().await;
    assert_eq!(bodies, vec![json!({"request_id": request_id, "payload": {"customer": "c1"}})]);
    assert_eq!(env.queue.inflight_len().await, 0);

    let stats = engine.stats().await;
    assert_eq!(stats.sync_completions, 1);
    assert_eq!(stats.messages_processed, 1);
}

#[tokio::test]
async fn sync_business_error_fails_job_without_retry() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_error("insufficient funds").await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({})).await;
    drain(&engine).await;

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("insufficient funds"));
    assert_eq!(job.retry_count, 0);
    assert_eq!(vendor.request_count().await, 1);
}

#[tokio::test]
async fn async_acceptance_waits_for_webhook_outcome() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_accepted().await;
    let engine =
        engine(&env, config(vec![VendorConfig::new("async", vendor.uri(), VendorMode::Async)]));

    let request_id = env.enqueue_job(json!({"n": 1})).await;
    engine.process_next().await.unwrap();

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.vendor.as_deref(), Some("async"));
    assert!(job.result.is_none());
    assert_eq!(env.queue.inflight_len().await, 0);

    let reconciliation = engine
        .reconciler()
        .reconcile(&request_id, Outcome::Success(json!({"password": "x", "done": true})))
        .await
        .unwrap();
    assert!(!reconciliation.already_finalized());

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.result, Some(json!({"done": true})));
}

#[tokio::test]
async fn repeated_server_errors_exhaust_retries() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_status(500).await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({})).await;
    drain(&engine).await;

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.error_message.as_deref(), Some("Max retries reached: server error: HTTP 500"));
    assert_eq!(vendor.request_count().await, 3);

    let stats = engine.stats().await;
    assert_eq!(stats.dispatch_failures, 3);
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.retries_exhausted, 1);
    assert_eq!(env.queue.inflight_len().await, 0);
}

#[tokio::test]
async fn retries_wait_linear_backoff() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_status(503).await;
    let config = DispatchConfig {
        retry_policy: RetryPolicy { max_retries: 3, base_delay: Duration::from_secs(2) },
        ..config(vec![sync_vendor(&vendor)])
    };
    let engine = engine(&env, config);

    env.enqueue_job(json!({})).await;
    drain(&engine).await;

    // Two timers fired: 1 * 2s then 2 * 2s.
    assert!(env.clock.elapsed() >= Duration::from_secs(6));
}

#[tokio::test]
async fn transient_failures_recover_before_limit() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success_after(2, 502, json!({"ok": true})).await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({})).await;
    drain(&engine).await;

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.result, Some(json!({"ok": true})));
    assert_eq!(vendor.request_count().await, 3);
}

#[tokio::test]
async fn redelivered_message_for_finished_job_is_ignored() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success(json!({"v": 1})).await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({})).await;
    engine.process_next().await.unwrap();
    let finished = env.job(&request_id).await;

    env.queue.push(QueueMessage::initial(request_id.clone(), json!({}))).await.unwrap();
    engine.process_next().await.unwrap();

    assert_eq!(env.job(&request_id).await, finished);
    assert_eq!(vendor.request_count().await, 1);
    assert_eq!(engine.stats().await.messages_dropped, 1);
}

#[tokio::test]
async fn sticky_selection_keeps_vendor_across_retries() {
    let env = TestEnv::new();
    let first = MockVendor::start().await;
    let second = MockVendor::start().await;
    first.respond_success_after(1, 500, json!({"from": "first"})).await;
    second.respond_success(json!({"from": "second"})).await;
    let config = DispatchConfig {
        vendor_selection: courier_dispatch::VendorSelection::Sticky,
        ..config(vec![
            VendorConfig::new("first", first.uri(), VendorMode::Sync),
            VendorConfig::new("second", second.uri(), VendorMode::Sync),
        ])
    };
    let engine = engine(&env, config);

    let job = JobBuilder::new().processing("first").build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;
    env.queue.push(QueueMessage::initial(request_id.clone(), json!({}))).await.unwrap();
    drain(&engine).await;

    let job = env.job(&request_id).await;
    assert_eq!(job.result, Some(json!({"from": "first"})));
    assert_eq!(first.request_count().await, 2);
    assert_eq!(second.request_count().await, 0);
}

#[tokio::test]
async fn rate_limit_delays_excess_dispatches() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success(json!({})).await;
    let limited = sync_vendor(&vendor).with_rate_limit(RateLimit::per_minute(2));
    let engine = engine(&env, config(vec![limited]));

    for _ in 0..3 {
        env.enqueue_job(json!({})).await;
    }
    engine.process_next().await.unwrap();
    engine.process_next().await.unwrap();
    assert!(env.clock.elapsed() < Duration::from_secs(1));

    engine.process_next().await.unwrap();
    assert!(env.clock.elapsed() >= Duration::from_secs(60));
    assert_eq!(vendor.request_count().await, 3);
}

#[tokio::test]
async fn background_workers_process_and_shut_down() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success(json!({"done": true})).await;
    let config = DispatchConfig { worker_count: 2, ..config(vec![sync_vendor(&vendor)]) };
    let mut engine = engine(&env, config);

    engine.start().await.unwrap();
    let ids = [env.enqueue_job(json!({"n": 1})).await, env.enqueue_job(json!({"n": 2})).await];
    for request_id in &ids {
        env.wait_for_status(request_id, JobStatus::Complete, Duration::from_secs(5)).await;
    }
    assert_eq!(engine.stats().await.active_workers, 2);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn queue_outage_is_survived() {
    let env = TestEnv::new();
    let vendor = MockVendor::start().await;
    vendor.respond_success(json!({})).await;
    let engine = engine(&env, config(vec![sync_vendor(&vendor)]));

    let request_id = env.enqueue_job(json!({})).await;
    env.queue.inject_error("connection refused").await;

    let error = engine.process_next().await.unwrap_err();
    assert!(error.is_infrastructure());
    assert_eq!(env.job(&request_id).await.status, JobStatus::Pending);

    drain(&engine).await;
    assert_eq!(env.job(&request_id).await.status, JobStatus::Complete);
}

fn racing_reconciler(env: &TestEnv) -> Reconciler {
    Reconciler::new(env.store_handle(), Sanitizer::default(), env.clock_handle())
}

async fn insert_last_attempt(env: &TestEnv) -> Job {
    let job = JobBuilder::new().processing("async").retry_count(2).build(env.clock.now_utc());
    env.insert_job(job.clone()).await;
    job
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_webhooks_and_exhaustion_finalize_once() {
    let env = TestEnv::new();
    let request_id = insert_last_attempt(&env).await.request_id;
    let reconciler = racing_reconciler(&env);

    let mut writers = Vec::new();
    for writer in 0..8 {
        let reconciler = reconciler.clone();
        let request_id = request_id.clone();
        writers.push(tokio::spawn(async move {
            reconciler.reconcile(&request_id, Outcome::Success(json!({"writer": writer}))).await
        }));
    }
    let exhaustion = {
        let reconciler = reconciler.clone();
        let message = DispatchError::retries_exhausted(3, "HTTP 503").to_string();
        let request_id = request_id.clone();
        tokio::spawn(async move { reconciler.fail(&request_id, message).await })
    };
    writers.push(exhaustion);

    let mut applied = Vec::new();
    let mut ignored = Vec::new();
    for writer in writers {
        match writer.await.unwrap().unwrap() {
            Reconciliation::Applied(job) => applied.push(job),
            Reconciliation::AlreadyFinalized(job) => ignored.push(job),
        }
    }

    assert_eq!(applied.len(), 1);
    assert_eq!(ignored.len(), 8);
    let winner = applied.remove(0);
    let stored = env.job(&request_id).await;
    assert_eq!(stored, winner);
    assert!(ignored.iter().all(|job| job == &winner));
    match stored.status {
        JobStatus::Complete => assert!(stored.error_message.is_none()),
        JobStatus::Failed => {
            assert!(stored.result.is_none());
            assert!(stored.error_message.as_deref().is_some_and(|m| m.starts_with("Max retries reached")));
        },
        other => panic!("job left in {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn webhooks_racing_retry_scheduler_leave_one_outcome() {
    let env = TestEnv::new();
    let job = insert_last_attempt(&env).await;
    let request_id = job.request_id.clone();
    let reconciler = racing_reconciler(&env);
    let scheduler = RetryScheduler::new(
        env.store_handle(),
        env.queue_handle(),
        reconciler.clone(),
        RetryPolicy { max_retries: 3, base_delay: Duration::from_millis(10) },
        env.clock_handle(),
    );
    let lease = Lease::new(QueueMessage::retry(request_id.clone(), job.payload, 2), "receipt");

    let mut webhooks = Vec::new();
    for writer in 0..8 {
        let reconciler = reconciler.clone();
        let request_id = request_id.clone();
        webhooks.push(tokio::spawn(async move {
            reconciler.reconcile(&request_id, Outcome::Success(json!({"writer": writer}))).await
        }));
    }
    let failure = tokio::spawn(async move {
        scheduler.handle_failure(&lease, &DispatchError::server_error(503, "down")).await
    });

    let mut applied = Vec::new();
    for webhook in webhooks {
        match webhook.await.unwrap().unwrap() {
            Reconciliation::Applied(job) => applied.push(job),
            Reconciliation::AlreadyFinalized(job) => assert!(job.is_terminal()),
        }
    }
    let decision = failure.await.unwrap().unwrap();

    assert!(applied.len() <= 1);
    let stored = env.job(&request_id).await;
    match applied.pop() {
        Some(winner) => {
            assert_eq!(stored, winner);
            assert_eq!(stored.status, JobStatus::Complete);
            assert!(matches!(decision, RetryDecision::Exhausted { .. } | RetryDecision::Abandoned));
        },
        None => {
            assert_eq!(decision, RetryDecision::Exhausted { retry_count: 3 });
            assert_eq!(stored.status, JobStatus::Failed);
            assert!(stored.error_message.as_deref().is_some_and(|m| m.starts_with("Max retries reached")));
        },
    }
    assert!(env.queue.is_empty().await);
}
