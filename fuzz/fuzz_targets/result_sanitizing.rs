#![no_main]

//! Fuzz target for result sanitization.
//!
//! Sanitizing arbitrary vendor JSON must not panic, must be idempotent and
//! must leave no sensitive key anywhere in the output.

use courier_core::Sanitizer;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let sanitizer = Sanitizer::default();
    let once = sanitizer.sanitize(&value);
    assert_eq!(sanitizer.sanitize(&once), once);
    assert!(!contains_sensitive_key(&sanitizer, &once));
});

fn contains_sensitive_key(sanitizer: &Sanitizer, value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, child)| sanitizer.is_sensitive(key) || contains_sensitive_key(sanitizer, child)),
        Value::Array(items) => items.iter().any(|item| contains_sensitive_key(sanitizer, item)),
        _ => false,
    }
}
