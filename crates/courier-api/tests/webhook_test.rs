//! Integration tests for the vendor webhook and job status endpoints.
//!
//! Drives the router with `oneshot` against the in-memory store so every
//! reconciliation rule is observable without external services.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_core::{Clock, JobStatus, Sanitizer};
use courier_testing::{webhook_body, JobBuilder, TestEnv};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(env: &TestEnv) -> Router {
    create_router(AppState::new(
        env.store_handle(),
        env.queue_handle(),
        Sanitizer::default(),
        env.clock_handle(),
    ))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("request should complete");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_webhook(vendor: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/vendor-webhook/{vendor}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn success_webhook_completes_processing_job() {
    let env = TestEnv::new();
    let job = JobBuilder::new().processing("async").build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;

    let body = webhook_body(&request_id, "success", json!({"score": 1, "password": "p", "n": " x "}));
    let (status, reply) = send(router(&env), post_webhook("async", &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, json!({"success": true, "request_id": request_id, "status": "complete"}));

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.result, Some(json!({"score": 1, "n": "x"})));
    assert!(job.vendor_response_received_at.is_some());
}

#[tokio::test]
async fn error_webhook_fails_job_with_vendor_message() {
    let env = TestEnv::new();
    let job = JobBuilder::new().processing("async").build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;

    let body = webhook_body(&request_id, "error", json!({"error": "boom"}));
    let (status, reply) = send(router(&env), post_webhook("async", &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "failed");

    let job = env.job(&request_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("boom"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn error_webhook_without_message_uses_default() {
    let env = TestEnv::new();
    let job = JobBuilder::new().processing("async").build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;

    let body = json!({"request_id": request_id, "status": "error"});
    send(router(&env), post_webhook("async", &body)).await;

    assert_eq!(env.job(&request_id).await.error_message.as_deref(), Some("Vendor failed"));
}

#[tokio::test]
async fn unknown_job_returns_not_found_without_mutation() {
    let env = TestEnv::new();
    let body = json!({"request_id": "does-not-exist", "status": "success", "data": {"a": 1}});

    let (status, reply) = send(router(&env), post_webhook("async", &body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply, json!({"error": "Job not found", "request_id": "does-not-exist"}));
    assert!(env.store.is_empty().await);
}

#[tokio::test]
async fn late_webhook_for_terminal_job_is_successful_no_op() {
    let env = TestEnv::new();
    let job = JobBuilder::new()
        .processing("async")
        .complete(json!({"first": true}))
        .build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;
    let before = env.job(&request_id).await;

    let body = webhook_body(&request_id, "error", json!({"error": "too late"}));
    let (status, reply) = send(router(&env), post_webhook("async", &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        reply,
        json!({
            "success": true,
            "request_id": request_id,
            "status": "complete",
            "already_finalized": true
        })
    );
    assert_eq!(env.job(&request_id).await, before);
}

#[tokio::test]
async fn duplicate_webhooks_apply_once() {
    let env = TestEnv::new();
    let job = JobBuilder::new().processing("async").build(env.clock.now_utc());
    let request_id = job.request_id.clone();
    env.insert_job(job).await;

    let first = webhook_body(&request_id, "success", json!({"v": 1}));
    let second = webhook_body(&request_id, "success", json!({"v": 2}));
    send(router(&env), post_webhook("async", &first)).await;
    let (_, reply) = send(router(&env), post_webhook("async", &second)).await;

    assert_eq!(reply["already_finalized"], true);
    assert_eq!(env.job(&request_id).await.result, Some(json!({"v": 1})));
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let env = TestEnv::new();
    let request = Request::builder()
        .method("POST")
        .uri("/vendor-webhook/async")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = send(router(&env), request).await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn job_status_shows_result_only_when_complete() {
    let env = TestEnv::new();
    let now = env.clock.now_utc();
    let done = JobBuilder::new().complete(json!({"ok": true})).build(now);
    let failed = JobBuilder::new().failed("nope").retry_count(3).build(now);
    let (done_id, failed_id) = (done.request_id.clone(), failed.request_id.clone());
    env.insert_job(done).await;
    env.insert_job(failed).await;

    let (status, reply) = send(router(&env), get(&format!("/jobs/{done_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "complete");
    assert_eq!(reply["result"], json!({"ok": true}));
    assert!(reply.get("error").is_none());

    let (_, reply) = send(router(&env), get(&format!("/jobs/{failed_id}"))).await;
    assert_eq!(reply["status"], "failed");
    assert_eq!(reply["error"], "nope");
    assert_eq!(reply["retry_count"], 3);
    assert!(reply.get("result").is_none());
}

#[tokio::test]
async fn job_status_for_unknown_job_is_not_found() {
    let env = TestEnv::new();

    let (status, reply) = send(router(&env), get("/jobs/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply["error"], "Job not found");
}

#[tokio::test]
async fn responses_carry_request_id_header() {
    let env = TestEnv::new();

    let response = router(&env).oneshot(get("/live")).await.unwrap();

    let generated = response.headers().get("x-request-id").expect("header should be set");
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
async fn client_request_id_is_echoed() {
    let env = TestEnv::new();
    let request = Request::builder()
        .method("GET")
        .uri("/live")
        .header("x-request-id", "abc")
        .body(Body::empty())
        .unwrap();

    let response = router(&env).oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "abc");
}

#[tokio::test]
async fn oversized_client_request_id_is_replaced() {
    let env = TestEnv::new();
    let request = Request::builder()
        .method("GET")
        .uri("/live")
        .header("x-request-id", "x".repeat(200))
        .body(Body::empty())
        .unwrap();

    let response = router(&env).oneshot(request).await.unwrap();

    let echoed = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_ne!(echoed, "x".repeat(200));
    assert_eq!(echoed.len(), 36);
}
