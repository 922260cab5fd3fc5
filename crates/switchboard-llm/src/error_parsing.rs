//! Shared API error parsing and failure-text introspection.
//!
//! Handles multiple error envelope formats:
//! - Standard: `{"error": {"message": "...", "type": "..."}}`
//! - Google:   `{"error": {"message": "...", "status": "..."}}` (also wrapped in an array)
//! - Detail:   `{"detail": "..."}`
//! - Flat:     `{"message": "...", "code": "..."}` / `{"Message": "..."}` (Bedrock)
//!
//! The pattern functions below are pure: they map error text to a retry
//! decision and never touch shared state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use switchboard_core::LlmError;

/// Parsed API error information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiErrorInfo {
    /// Human-readable error message.
    pub message: String,
    /// Provider-specific error code (e.g., `"overloaded_error"`, `"NOT_FOUND"`).
    pub code: Option<String>,
    /// Whether the status alone suggests a retry (429 or 5xx).
    pub retryable: bool,
}

/// Parse an API error response body into structured error info.
///
/// Tries multiple JSON error formats in order of specificity, falling back
/// to the raw body text if nothing matches.
pub fn parse_api_error(body: &str, status: u16) -> ApiErrorInfo {
    let retryable = status == 429 || status >= 500;

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        // Gemini sometimes wraps the envelope in a one-element array
        let json = match json {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };

        if let Some(msg) = json["error"]["message"].as_str() {
            let code = json["error"]["type"]
                .as_str()
                .or_else(|| json["error"]["status"].as_str())
                .or_else(|| json["error"]["code"].as_str())
                .map(String::from);
            return ApiErrorInfo {
                message: msg.to_string(),
                code,
                retryable,
            };
        }

        if let Some(msg) = json["error"].as_str() {
            return ApiErrorInfo {
                message: msg.to_string(),
                code: None,
                retryable,
            };
        }

        if let Some(msg) = json["detail"]
            .as_str()
            .or_else(|| json["message"].as_str())
            .or_else(|| json["Message"].as_str())
        {
            let code = json["code"]
                .as_str()
                .or_else(|| json["type"].as_str())
                .or_else(|| json["__type"].as_str())
                .map(String::from);
            return ApiErrorInfo {
                message: msg.to_string(),
                code,
                retryable,
            };
        }

        return ApiErrorInfo {
            message: format!("HTTP {status}: {body}"),
            code: None,
            retryable,
        };
    }

    ApiErrorInfo {
        message: format!("HTTP {status}: {body}"),
        code: None,
        retryable,
    }
}

/// Build the typed error for a non-success response.
pub fn backend_error(status: u16, body: &str) -> LlmError {
    let info = parse_api_error(body, status);
    let message = match info.code {
        Some(code) if !info.message.contains(&code) => format!("{} ({code})", info.message),
        _ => info.message,
    };
    LlmError::backend(status, message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Token ceilings
// ─────────────────────────────────────────────────────────────────────────────

static CEILING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)model limit of\s+`?(\d[\d,]*)",
        r"(?i)max_tokens:\s*\d[\d,]*\s*>\s*(\d[\d,]*)",
        r"(?i)lower than\s+`?(\d[\d,]*)",
        r"(?i)less than or equal to\s+`?(\d[\d,]*)",
        r"(?i)supports at most\s+`?(\d[\d,]*)",
        r"(?i)maximum of\s+`?(\d[\d,]*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("ceiling pattern is valid"))
    .collect()
});

/// Extract an output-token ceiling from backend error text.
///
/// Recognised phrasings include "model limit of N", "lower than N",
/// "max_tokens: A > N", "less than or equal to N", "supports at most N"
/// and "maximum of N". The first matching pattern wins.
pub fn parse_token_ceiling(text: &str) -> Option<u32> {
    CEILING_PATTERNS.iter().find_map(|re| {
        let digits = re.captures(text)?.get(1)?.as_str().replace(',', "");
        digits.parse::<u32>().ok().filter(|n| *n > 0)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Invocation aliases and capacity
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the backend refused the bare model id and wants an invocation alias.
pub fn requires_invocation_alias(text: &str) -> bool {
    let lower = text.to_lowercase();
    let on_demand = lower.contains("on-demand throughput") || lower.contains("on demand throughput");
    let unsupported = lower.contains("isn't supported")
        || lower.contains("is not supported")
        || lower.contains("not supported");
    (on_demand && unsupported) || lower.contains("with the id or arn of an inference profile")
}

const CAPACITY_STATUSES: [u16; 3] = [429, 503, 529];
const CAPACITY_PHRASES: [&str; 6] = [
    "overloaded",
    "rate limit",
    "rate_limit",
    "too many requests",
    "throttl",
    "service unavailable",
];

/// Whether a failure looks like transient capacity exhaustion.
pub fn is_capacity_error(status: Option<u16>, text: &str) -> bool {
    if status.is_some_and(|s| CAPACITY_STATUSES.contains(&s)) {
        return true;
    }
    let lower = text.to_lowercase();
    CAPACITY_PHRASES.iter().any(|p| lower.contains(p))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_standard_format() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let info = parse_api_error(body, 529);
        assert_eq!(info.message, "Overloaded");
        assert_eq!(info.code.as_deref(), Some("overloaded_error"));
        assert!(info.retryable);
    }

    #[test]
    fn google_array_wrapped_format() {
        let body = r#"[{"error":{"code":400,"status":"INVALID_ARGUMENT","message":"bad schema"}}]"#;
        let info = parse_api_error(body, 400);
        assert_eq!(info.message, "bad schema");
        assert_eq!(info.code.as_deref(), Some("INVALID_ARGUMENT"));
        assert!(!info.retryable);
    }

    #[test]
    fn bedrock_capital_message_format() {
        let body = r#"{"Message":"Too many tokens","__type":"ThrottlingException"}"#;
        let info = parse_api_error(body, 400);
        assert_eq!(info.message, "Too many tokens");
        assert_eq!(info.code.as_deref(), Some("ThrottlingException"));
    }

    #[test]
    fn openai_detail_format() {
        let info = parse_api_error(r#"{"detail":"Model not found"}"#, 404);
        assert_eq!(info.message, "Model not found");
        assert!(info.code.is_none());
    }

    #[test]
    fn bare_error_string() {
        let info = parse_api_error(r#"{"error":"model 'x' not found"}"#, 404);
        assert_eq!(info.message, "model 'x' not found");
    }

    #[test]
    fn unrecognized_json_includes_body() {
        let info = parse_api_error(r#"{"error":{}}"#, 400);
        assert!(info.message.contains("400"));
        assert!(info.message.contains(r#"{"error":{}}"#));
    }

    #[test]
    fn non_json_body() {
        let info = parse_api_error("Bad Gateway", 502);
        assert_eq!(info.message, "HTTP 502: Bad Gateway");
        assert!(info.retryable);
    }

    #[test]
    fn backend_error_appends_code() {
        let err = backend_error(400, r#"{"error":{"type":"invalid_request_error","message":"bad"}}"#);
        assert_eq!(err, LlmError::backend(400, "bad (invalid_request_error)"));
    }

    #[test]
    fn ceiling_model_limit() {
        assert_eq!(
            parse_token_ceiling("max_tokens is too large: 8000. This model supports a model limit of 4096 tokens"),
            Some(4096)
        );
    }

    #[test]
    fn ceiling_lower_than() {
        let text = "The maximum tokens you requested exceeds the model limit; provide a maximum tokens value lower than 64000.";
        // "model limit" without a number must not shadow the later match
        assert_eq!(parse_token_ceiling(text), Some(64000));
    }

    #[test]
    fn ceiling_anthropic_comparison() {
        let text = "max_tokens: 100000 > 64000, which is the maximum allowed number of output tokens for claude-sonnet";
        assert_eq!(parse_token_ceiling(text), Some(64000));
    }

    #[test]
    fn ceiling_less_than_or_equal() {
        assert_eq!(
            parse_token_ceiling("Invalid max_tokens value, the valid range of max_tokens is [1, 8192]; must be less than or equal to `8192`"),
            Some(8192)
        );
    }

    #[test]
    fn ceiling_supports_at_most_and_maximum_of() {
        assert_eq!(
            parse_token_ceiling("This model supports at most 16,384 completion tokens"),
            Some(16384)
        );
        assert_eq!(parse_token_ceiling("max_tokens has a maximum of 32000"), Some(32000));
    }

    #[test]
    fn ceiling_absent() {
        assert_eq!(parse_token_ceiling("invalid api key"), None);
        assert_eq!(parse_token_ceiling("model limit of 0"), None);
        assert_eq!(parse_token_ceiling(""), None);
    }

    #[test]
    fn alias_required_bedrock_message() {
        let text = "Invocation of model ID anthropic.claude-3-7-sonnet-20250219-v1:0 with on-demand throughput isn't supported. Retry your request with the ID or ARN of an inference profile that contains this model.";
        assert!(requires_invocation_alias(text));
        assert!(!requires_invocation_alias("model not found"));
    }

    #[test]
    fn capacity_by_status_or_text() {
        assert!(is_capacity_error(Some(429), ""));
        assert!(is_capacity_error(Some(529), ""));
        assert!(is_capacity_error(Some(400), "ThrottlingException: Too many requests"));
        assert!(is_capacity_error(None, "Overloaded"));
        assert!(!is_capacity_error(Some(400), "bad request"));
        assert!(!is_capacity_error(Some(500), "internal"));
    }
}
