use std::fmt;

use salvo::http::StatusCode;
use serde_json::Value;

/// Failure of an outbound call to a destination platform.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    /// Remote HTTP status, `BAD_GATEWAY` when no usable response arrived, or
    /// `MULTI_STATUS` when a successful reply carried per-record failures.
    pub status: StatusCode,
    pub message: String,
    /// Remote error body, kept verbatim when it parsed as JSON.
    pub detail: Option<Value>,
}

impl UpstreamError {
    pub fn transport(message: String) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message,
            detail: None,
        }
    }

    /// The call succeeded but the body reports records the destination refused.
    pub fn rejected(message: String, body: Value) -> Self {
        Self {
            status: StatusCode::MULTI_STATUS,
            message,
            detail: Some(body),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

#[derive(Debug)]
pub enum RelayError {
    Unauthorized,
    Validation(String),
    Configuration(String),
    Delivery(UpstreamError),
}

impl RelayError {
    /// Outward status for the webhook caller. Remote failures always surface
    /// as 500 regardless of the remote status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) | Self::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn remote_detail(&self) -> Option<&Value> {
        match self {
            Self::Delivery(error) => error.detail.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("Invalid or missing webhook secret."),
            Self::Validation(message) | Self::Configuration(message) => f.write_str(message),
            Self::Delivery(error) => f.write_str(&error.message),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(error: UpstreamError) -> Self {
        Self::Delivery(error)
    }
}

/// Pulls a human-readable message out of a GHL or HubSpot error body.
pub fn extract_error_message_from_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(message) = parsed.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = parsed.get("msg").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = parsed
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
        if let Some(message) = parsed.get("error").and_then(Value::as_str) {
            return message.to_string();
        }
    }

    if body.trim().is_empty() {
        "destination API returned an empty error response".to_string()
    } else {
        body.to_string()
    }
}
