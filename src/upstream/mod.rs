mod crm;
mod marketing;

pub use marketing::BatchError;

use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT,
};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::{Config, Destination};
use crate::constants::USER_AGENT_VALUE;
use crate::errors::{RelayError, UpstreamError, extract_error_message_from_body};
use crate::utils::to_salvo_status;

/// Shared outbound HTTP client. Every call carries the configured timeout
/// and is never retried.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: Client,
    timeout: Duration,
}

/// What a destination needs to authenticate one call.
#[derive(Clone, Copy, Debug)]
pub struct Credentials<'a> {
    pub destination: &'a str,
    pub base_url: &'a str,
    pub api_key: &'a str,
}

impl<'a> Credentials<'a> {
    pub fn for_destination(destination: &'a Destination) -> Result<Self, RelayError> {
        let api_key = destination.api_key.as_deref().ok_or_else(|| {
            RelayError::Configuration(format!(
                "API key for destination '{}' is not configured",
                destination.name
            ))
        })?;
        Ok(Self {
            destination: &destination.name,
            base_url: &destination.base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

struct UpstreamCall<'a> {
    method: Method,
    path: String,
    api_version: Option<&'a str>,
    request_kind: &'static str,
}

impl<'a> UpstreamCall<'a> {
    fn post(path: impl Into<String>, request_kind: &'static str) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            api_version: None,
            request_kind,
        }
    }

    fn patch(path: impl Into<String>, request_kind: &'static str) -> Self {
        Self {
            method: Method::PATCH,
            ..Self::post(path, request_kind)
        }
    }

    fn with_api_version(mut self, api_version: Option<&'a str>) -> Self {
        self.api_version = api_version;
        self
    }
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .build()
            .map_err(|error| format!("failed to initialize upstream HTTP client: {error}"))?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.request_timeout),
        })
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        credentials: &Credentials<'_>,
        call: UpstreamCall<'_>,
        body: &T,
    ) -> Result<Value, UpstreamError> {
        let url = credentials.url(&call.path);
        let destination = credentials.destination;
        let request_kind = call.request_kind;
        let path = call.path.as_str();

        let request_builder = self
            .client
            .request(call.method.clone(), &url)
            .headers(build_upstream_headers(credentials.api_key, call.api_version))
            .timeout(self.timeout)
            .json(body);

        debug!(
            phase = "upstream_request_start",
            request_kind,
            destination,
            method = %call.method,
            url = %url,
            timeout_secs = self.timeout.as_secs(),
            "Sending upstream request"
        );
        let request_started = Instant::now();
        let response = request_builder.send().await.map_err(|error| {
            build_send_error(
                error,
                self.timeout,
                request_kind,
                path,
                destination,
                request_started.elapsed(),
            )
        })?;

        debug!(
            phase = "upstream_response_headers",
            request_kind,
            destination,
            path,
            status = %response.status(),
            content_type = %response_content_type(&response),
            content_length = ?response.content_length(),
            elapsed_ms = request_started.elapsed().as_millis() as u64,
            "Received upstream response headers"
        );

        if !response.status().is_success() {
            return Err(handle_http_error_response(response, request_kind, path, destination).await);
        }

        let status = response.status();
        let content_type = response_content_type(&response);
        let body = response.bytes().await.map_err(|error| {
            error!(
                phase = "upstream_body_read_failed",
                request_kind,
                destination,
                path,
                status = %status,
                timeout = error.is_timeout(),
                "Failed to read upstream response body: {error}"
            );
            UpstreamError::transport(format!(
                "failed to read destination response body (status: {status}): {error}"
            ))
        })?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        decode_json_body::<Value>(status, &content_type, &body)
    }
}

const BODY_PREVIEW_LIMIT: usize = 1024;

async fn handle_http_error_response(
    response: reqwest::Response,
    request_kind: &str,
    path: &str,
    destination: &str,
) -> UpstreamError {
    let upstream_status = response.status();
    let status = to_salvo_status(upstream_status);
    let content_type = response_content_type(&response);

    let text = match response.text().await {
        Ok(value) => value,
        Err(error) => {
            warn!(
                phase = "upstream_error_body_read_failed",
                request_kind,
                destination,
                path,
                status = %upstream_status,
                timeout = error.is_timeout(),
                "Failed to read upstream error response body: {error}"
            );
            String::new()
        }
    };

    warn!(
        phase = "upstream_http_error",
        request_kind,
        destination,
        path,
        status = %upstream_status,
        content_type = %content_type,
        body_bytes = text.len(),
        body_preview = %preview_text(&text, BODY_PREVIEW_LIMIT),
        "Destination returned non-success status"
    );

    UpstreamError {
        status,
        message: extract_error_message_from_body(&text),
        detail: serde_json::from_str::<Value>(&text).ok(),
    }
}

fn response_content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "<missing>".to_string())
}

fn decode_json_body<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    content_type: &str,
    body: &[u8],
) -> Result<T, UpstreamError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        let body_preview = preview_bytes(body, BODY_PREVIEW_LIMIT);
        UpstreamError::transport(format!(
            "failed to parse destination JSON response (status: {status}, content-type: {content_type}, body-preview: {body_preview}): {error}"
        ))
    })
}

fn preview_bytes(body: &[u8], limit: usize) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => preview_text(text, limit).into_owned(),
        Err(_) => {
            let len = body.len().min(limit);
            let mut preview = String::with_capacity(len * 2 + 32);
            for byte in &body[..len] {
                use std::fmt::Write;
                let _ = write!(&mut preview, "{byte:02x}");
            }
            if body.len() > limit {
                preview.push_str("...(truncated)");
            }
            format!("<non-utf8 hex: {preview}>")
        }
    }
}

fn preview_text(text: &str, limit: usize) -> Cow<'_, str> {
    let mut iterator = text.chars();
    let preview: String = iterator.by_ref().take(limit).collect();
    if iterator.next().is_none() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{preview}...(truncated)"))
    }
}

fn build_send_error(
    error: reqwest::Error,
    timeout: Duration,
    request_kind: &'static str,
    path: &str,
    destination: &str,
    elapsed: Duration,
) -> UpstreamError {
    let elapsed_ms = elapsed.as_millis() as u64;
    let timeout_secs = timeout.as_secs();

    if error.is_timeout() {
        error!(
            phase = "upstream_timeout",
            request_kind,
            destination,
            path,
            timeout_secs,
            elapsed_ms,
            "Destination timed out before response headers"
        );
        return UpstreamError::transport(format!(
            "destination request timed out after {timeout_secs}s"
        ));
    }

    if error.is_connect() {
        error!(
            phase = "upstream_connect_error",
            request_kind,
            destination,
            path,
            timeout_secs,
            elapsed_ms,
            "Destination connection failed: {error}"
        );
    } else {
        error!(
            phase = "upstream_request_error",
            request_kind,
            destination,
            path,
            timeout_secs,
            elapsed_ms,
            "Destination request failed before response headers: {error}"
        );
    }

    UpstreamError::transport(format!("destination request failed: {error}"))
}

fn build_upstream_headers(api_key: &str, api_version: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    if let Ok(auth_value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, auth_value);
    }

    if let Some(version) = api_version {
        match HeaderValue::from_str(version) {
            Ok(value) => {
                headers.insert("Version", value);
            }
            Err(_) => warn!("invalid API version header value ignored: {version}"),
        }
    }

    headers
}
