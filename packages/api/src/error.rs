//! The error envelope returned by every failing coordinator endpoint.

use serde::{Deserialize, Serialize};

/// Wire shape of an error response: `{"error": "...", "context": {...}}`.
///
/// `context` carries endpoint-specific detail (the offending field, the
/// job id, the current status) and is omitted when empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            context: None,
        }
    }

    pub fn with_context(error: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            error: error.into(),
            context: Some(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_omitted_when_absent() {
        let body = ErrorBody::new("boom");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn context_round_trips() {
        let body = ErrorBody::with_context("nope", serde_json::json!({"job_id": "x"}));
        let text = serde_json::to_string(&body).unwrap();
        let back: ErrorBody = serde_json::from_str(&text).unwrap();
        assert_eq!(back.error, "nope");
        assert_eq!(back.context.unwrap()["job_id"], "x");
    }
}
