//! Structured request outcomes.

use serde::Serialize;

/// Message of every successful response.
pub const SUCCESS_MESSAGE: &str = "Request successful";

/// Client-facing summary for a status code.
pub fn status_message(code: u16) -> &'static str {
    match code {
        401 => "An error occured while authorizing the request",
        500..=599 => "An internal server error occurred, please contact your administrator",
        _ => "An error occurred while validating the request",
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// Always [`SUCCESS_MESSAGE`].
    pub message: String,
    /// Rendered manifest response; null when the manifest has none.
    pub data: serde_json::Value,
}

impl ApiResponse {
    /// Wrap a manifest result.
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            message: SUCCESS_MESSAGE.to_owned(),
            data: data.unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A failed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    /// Generic message for the status code.
    pub message: String,
    /// Specific error text.
    pub error: String,
    /// Status code.
    pub code: u16,
    /// Exception details, only in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

/// Exception details attached to 500-class errors in debug mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    /// Top-level error text.
    pub exception: String,
    /// Messages of the underlying causes, outermost first.
    pub causes: Vec<String>,
}

impl DebugInfo {
    /// Collect an error and its source chain (message text only).
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            exception: err.to_string(),
            causes,
        }
    }
}
