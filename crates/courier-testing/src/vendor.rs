//! Mock vendors backed by wiremock.
//!
//! Each mock answers `POST /process` the way a real sync or async vendor
//! would and records the dispatch bodies it received.

use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// A vendor endpoint on a random local port.
pub struct MockVendor {
    server: MockServer,
}

impl MockVendor {
    /// Starts a vendor with no responses mounted.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL to put in the vendor configuration.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answers every dispatch with a synchronous success carrying `data`.
    pub async fn respond_success(&self, data: Value) {
        let body = json!({"status": "success", "data": data});
        self.mount(ResponseTemplate::new(200).set_body_json(body), None).await;
    }

    /// Answers every dispatch with a synchronous business failure.
    pub async fn respond_error(&self, message: &str) {
        self.mount(
            ResponseTemplate::new(200).set_body_json(json!({"status": "error", "error": message})),
            None,
        )
        .await;
    }

    /// Acknowledges every dispatch for later webhook delivery.
    pub async fn respond_accepted(&self) {
        self.mount(ResponseTemplate::new(202).set_body_json(json!({"status": "accepted"})), None)
            .await;
    }

    /// Answers every dispatch with a bare HTTP status.
    pub async fn respond_status(&self, status: u16) {
        self.mount(ResponseTemplate::new(status).set_body_string("mock failure"), None).await;
    }

    /// Fails the first `failures` dispatches with `status`, then succeeds.
    pub async fn respond_success_after(&self, failures: u64, status: u16, data: Value) {
        self.mount(ResponseTemplate::new(status).set_body_string("mock failure"), Some(failures))
            .await;
        self.respond_success(data).await;
    }

    /// Number of dispatches received.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }

    /// JSON bodies of the dispatches received, in arrival order.
    pub async fn received_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| request.body_json::<Value>().ok())
            .collect()
    }

    async fn mount(&self, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("POST")).and(path("/process")).respond_with(response);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}
