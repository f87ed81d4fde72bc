#![no_main]

//! Fuzz target for vendor webhook bodies.
//!
//! Any byte string a vendor might post must either be rejected by the JSON
//! extractor or map to exactly one outcome, never a panic.

use courier_api::handlers::webhook::WebhookRequest;
use courier_core::Outcome;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<WebhookRequest>(data) else {
        return;
    };

    match request.outcome() {
        Outcome::Success(result) => {
            assert_eq!(request.status, "success");
            assert!(!result.is_null());
            assert_ne!(result, serde_json::Value::Bool(false));
        },
        Outcome::Failure { message } => {
            assert!(message.is_some());
        },
    }
});
