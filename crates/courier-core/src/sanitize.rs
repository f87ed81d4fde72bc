//! Vendor result sanitization.
//!
//! Removes sensitive fields at every depth of a JSON document and trims
//! whitespace from string leaves. The transform is pure and idempotent.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

/// Field names stripped when no explicit list is configured.
pub const DEFAULT_SENSITIVE_FIELDS: [&str; 5] =
    ["ssn", "social_security_number", "credit_card", "password", "secret"];

/// Deepest container level that is still traversed. Matches serde_json's
/// own recursion limit, so documents parsed from text never reach it.
pub const MAX_DEPTH: usize = 128;

/// Recursive sensitive-field stripper.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    fields: HashSet<String>,
}

impl Sanitizer {
    /// Creates a sanitizer that removes the given field names.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }

    /// Returns true if `name` is stripped by this sanitizer.
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    /// Returns a sanitized copy of `value`.
    ///
    /// Object keys in the sensitive set are dropped, strings are trimmed
    /// (including strings inside arrays) and all other scalars pass through.
    /// Containers nested deeper than [`MAX_DEPTH`] are replaced with `null`.
    pub fn sanitize(&self, value: &Value) -> Value {
        let mut truncated = false;
        let cleaned = self.clean(value, 0, &mut truncated);
        if truncated {
            warn!(max_depth = MAX_DEPTH, "vendor data exceeded nesting limit, deep values dropped");
        }
        cleaned
    }

    fn clean(&self, value: &Value, depth: usize, truncated: &mut bool) -> Value {
        match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            Value::Array(_) | Value::Object(_) if depth >= MAX_DEPTH => {
                *truncated = true;
                Value::Null
            },
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.clean(item, depth + 1, truncated)).collect())
            },
            Value::Object(map) => {
                let mut cleaned = Map::with_capacity(map.len());
                for (key, child) in map {
                    if self.is_sensitive(key) {
                        continue;
                    }
                    cleaned.insert(key.clone(), self.clean(child, depth + 1, truncated));
                }
                Value::Object(cleaned)
            },
            other => other.clone(),
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_nested_fields_and_trims() {
        let sanitizer = Sanitizer::new(["ssn"]);
        let input = json!({"a": " x ", "b": {"ssn": "123-45-6789", "c": " y "}});

        assert_eq!(sanitizer.sanitize(&input), json!({"a": "x", "b": {"c": "y"}}));
    }

    #[test]
    fn default_set_covers_common_secrets() {
        let sanitizer = Sanitizer::default();
        let input = json!({
            "password": "hunter2",
            "credit_card": "4111",
            "profile": {"secret": "s", "social_security_number": "1", "name": "Ann "},
        });

        assert_eq!(sanitizer.sanitize(&input), json!({"profile": {"name": "Ann"}}));
    }

    #[test]
    fn arrays_are_preserved_and_cleaned() {
        let sanitizer = Sanitizer::default();
        let input = json!({"tags": [" a ", {"password": "p", "k": " v"}, 3, null]});

        assert_eq!(sanitizer.sanitize(&input), json!({"tags": ["a", {"k": "v"}, 3, null]}));
    }

    #[test]
    fn scalars_pass_through() {
        let sanitizer = Sanitizer::default();
        assert_eq!(sanitizer.sanitize(&json!(42)), json!(42));
        assert_eq!(sanitizer.sanitize(&json!(true)), json!(true));
        assert_eq!(sanitizer.sanitize(&Value::Null), Value::Null);
        assert_eq!(sanitizer.sanitize(&json!("  padded\n")), json!("padded"));
    }

    #[test]
    fn containers_beyond_depth_limit_become_null() {
        let mut value = json!({"leaf": " x "});
        for _ in 0..MAX_DEPTH {
            value = json!([value]);
        }

        let cleaned = Sanitizer::default().sanitize(&value);

        let mut cursor = &cleaned;
        for _ in 0..MAX_DEPTH {
            cursor = &cursor[0];
        }
        assert_eq!(cursor, &Value::Null);
        assert_eq!(Sanitizer::default().sanitize(&cleaned), cleaned);
    }
}
