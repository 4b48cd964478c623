use std::sync::Arc;

use salvo::affix_state;
use salvo::http::StatusCode;
use salvo::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CrmProfile, Destination, DestinationKind, MarketingProfile};
use crate::constants::{BATCH_ITEMS_FIELD, SECRET_FIELD, SECRET_HEADER, SERVICE_NAME};
use crate::errors::RelayError;
use crate::models::{DeliveryResult, DeliveryStatus};
use crate::normalize::{normalize_for_crm, normalize_for_marketing};
use crate::state::AppState;
use crate::upstream::{BatchError, Credentials};
use crate::utils::now_timestamp_string;

pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .hoop(affix_state::inject(state.clone()))
        .get(root)
        .push(Router::with_path("health").get(health_check));

    for destination in &state.config.destinations {
        let mut route = Router::with_path(destination.path.clone()).post(DeliverWebhook {
            destination: destination.name.clone(),
        });
        if matches!(destination.kind, DestinationKind::Marketing(_)) {
            route = route.push(Router::with_path("batch").post(DeliverBatch {
                destination: destination.name.clone(),
            }));
        }
        router = router.push(route);
    }

    router
}

/// Single webhook for one destination profile.
struct DeliverWebhook {
    destination: String,
}

#[handler]
impl DeliverWebhook {
    async fn handle(&self, req: &mut Request, depot: &mut Depot, res: &mut Response) {
        let Some(state) = obtain_state(depot) else {
            render_error(res, &missing_state());
            return;
        };
        let Some(destination) = state.config.destination(&self.destination) else {
            render_error(res, &missing_destination(&self.destination));
            return;
        };
        let request_id = Uuid::new_v4().to_string();

        match deliver_webhook(&state, destination, req, &request_id).await {
            Ok(result) => {
                state.request_log.record(
                    destination.deliveries_stream(),
                    json!({"request_id": request_id, "result": result}),
                );
                res.status_code(StatusCode::OK);
                res.render(Json(DeliveryResponse {
                    status: "success",
                    destination: destination.name.clone(),
                    result: result.status,
                    id: result.id,
                }));
            }
            Err(error) => {
                log_failure(&state, destination, &request_id, &error);
                render_error(res, &error);
            }
        }
    }
}

/// Array of webhook payloads for a marketing destination.
struct DeliverBatch {
    destination: String,
}

#[handler]
impl DeliverBatch {
    async fn handle(&self, req: &mut Request, depot: &mut Depot, res: &mut Response) {
        let Some(state) = obtain_state(depot) else {
            render_error(res, &missing_state());
            return;
        };
        let Some(destination) = state.config.destination(&self.destination) else {
            render_error(res, &missing_destination(&self.destination));
            return;
        };
        let request_id = Uuid::new_v4().to_string();

        match deliver_batch(&state, destination, req, &request_id).await {
            Ok(results) => {
                state.request_log.record(
                    destination.deliveries_stream(),
                    json!({"request_id": request_id, "results": results}),
                );
                res.status_code(StatusCode::OK);
                res.render(Json(BatchResponse {
                    status: "success",
                    destination: destination.name.clone(),
                    results,
                }));
            }
            Err(BatchFailure::Relay(error)) => {
                log_failure(&state, destination, &request_id, &error);
                render_error(res, &error);
            }
            Err(BatchFailure::Partial(batch_error)) => {
                error!(
                    phase = "batch_delivery_failed",
                    request_id = %request_id,
                    destination = %destination.name,
                    failed_group = batch_error.failed_group,
                    applied = batch_error.applied.len(),
                    "Batch delivery failed: {}",
                    batch_error.error
                );
                state.request_log.record(
                    destination.deliveries_stream(),
                    json!({
                        "request_id": request_id,
                        "error": batch_error.error.message,
                        "remote": batch_error.error.detail,
                        "failed_group": batch_error.failed_group,
                        "applied": batch_error.applied,
                    }),
                );
                res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
                res.render(Json(BatchFailureResponse {
                    detail: batch_error.to_string(),
                    remote: batch_error.error.detail,
                    failed_group: batch_error.failed_group,
                    applied: batch_error.applied,
                }));
            }
        }
    }
}

#[handler]
pub async fn health_check(depot: &mut Depot, res: &mut Response) {
    let Some(state) = obtain_state(depot) else {
        render_error(res, &missing_state());
        return;
    };
    res.status_code(StatusCode::OK);
    res.render(Json(HealthCheckResponse {
        status: "healthy",
        timestamp: now_timestamp_string(),
        destinations: state.config.destinations.len(),
        shared_secret_configured: state.config.webhook_secret.is_some(),
    }));
}

#[handler]
pub async fn root(depot: &mut Depot, res: &mut Response) {
    let Some(state) = obtain_state(depot) else {
        render_error(res, &missing_state());
        return;
    };
    let destinations = state
        .config
        .destinations
        .iter()
        .map(|destination| RootDestination {
            name: destination.name.clone(),
            kind: destination.kind_name(),
            route: format!("/{}", destination.path),
            batch_route: matches!(destination.kind, DestinationKind::Marketing(_))
                .then(|| format!("/{}/batch", destination.path)),
            credentials_configured: destination.api_key.is_some(),
        })
        .collect();

    res.status_code(StatusCode::OK);
    res.render(Json(RootResponse {
        message: SERVICE_NAME,
        status: "running",
        log_dir: state.request_log.dir().display().to_string(),
        destinations,
        health: "/health",
    }));
}

async fn deliver_webhook(
    state: &AppState,
    destination: &Destination,
    req: &mut Request,
    request_id: &str,
) -> Result<DeliveryResult, RelayError> {
    let early_secret = secret_from_request(req);
    if early_secret.is_some() {
        authorize(state.config.webhook_secret.as_deref(), early_secret.as_deref())?;
    }

    let mut payload = parse_object_body(req, state.config.request_body_max_size).await?;

    if early_secret.is_none() {
        let body_secret = payload
            .get(SECRET_FIELD)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        authorize(state.config.webhook_secret.as_deref(), body_secret.as_deref())?;
    }
    if state.config.webhook_secret.is_some() {
        payload.remove(SECRET_FIELD);
    }

    debug!(
        phase = "webhook_received",
        request_id,
        destination = %destination.name,
        kind = destination.kind_name(),
        keys_len = payload.len(),
        "Received webhook payload"
    );
    state
        .request_log
        .record(destination.requests_stream(), Value::Object(payload.clone()));

    let result = match &destination.kind {
        DestinationKind::Crm(profile) => {
            deliver_to_crm(state, destination, profile, &payload).await?
        }
        DestinationKind::Marketing(profile) => {
            deliver_to_marketing(state, destination, profile, &payload).await?
        }
    };

    info!(
        phase = "webhook_delivered",
        request_id,
        destination = %destination.name,
        status = ?result.status,
        contact_id = result.id.as_deref().unwrap_or("unknown"),
        "Webhook delivered"
    );
    Ok(result)
}

async fn deliver_to_crm(
    state: &AppState,
    destination: &Destination,
    profile: &CrmProfile,
    payload: &Map<String, Value>,
) -> Result<DeliveryResult, RelayError> {
    let contact = normalize_for_crm(
        payload,
        &profile.default_tags,
        profile.location_id.as_deref(),
        profile.tag_pattern.as_ref(),
    );
    if !contact.has_identity() {
        return Err(RelayError::Validation(
            "Email or phone is required".to_string(),
        ));
    }

    let credentials = Credentials::for_destination(destination)?;
    let result = state
        .upstream
        .send_contact(&credentials, profile.api_version.as_deref(), &contact)
        .await?;
    Ok(result)
}

async fn deliver_to_marketing(
    state: &AppState,
    destination: &Destination,
    profile: &MarketingProfile,
    payload: &Map<String, Value>,
) -> Result<DeliveryResult, RelayError> {
    let contact = normalize_for_marketing(payload, &profile.schema);
    if !contact.has_email() {
        return Err(RelayError::Validation("Email is required".to_string()));
    }

    let credentials = Credentials::for_destination(destination)?;
    let result = state.upstream.upsert_one(&credentials, &contact).await?;
    Ok(result)
}

enum BatchFailure {
    Relay(RelayError),
    Partial(BatchError),
}

impl From<RelayError> for BatchFailure {
    fn from(error: RelayError) -> Self {
        Self::Relay(error)
    }
}

async fn deliver_batch(
    state: &AppState,
    destination: &Destination,
    req: &mut Request,
    request_id: &str,
) -> Result<Vec<DeliveryResult>, BatchFailure> {
    let DestinationKind::Marketing(profile) = &destination.kind else {
        return Err(RelayError::Configuration(format!(
            "Destination '{}' does not accept batches",
            destination.name
        ))
        .into());
    };

    let early_secret = secret_from_request(req);
    if early_secret.is_some() {
        authorize(state.config.webhook_secret.as_deref(), early_secret.as_deref())?;
    }

    let body = req
        .parse_json_with_max_size::<Value>(state.config.request_body_max_size)
        .await
        .map_err(|error| RelayError::Validation(format!("invalid request body: {error}")))?;
    let (mut items, body_secret) = split_batch_body(body)?;

    if early_secret.is_none() {
        authorize(state.config.webhook_secret.as_deref(), body_secret.as_deref())?;
    }
    if state.config.webhook_secret.is_some() {
        for item in &mut items {
            if let Value::Object(payload) = item {
                payload.remove(SECRET_FIELD);
            }
        }
    }

    let mut contacts = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let contact = item
            .as_object()
            .map(|payload| normalize_for_marketing(payload, &profile.schema))
            .filter(|contact| contact.has_email());
        match contact {
            Some(contact) => contacts.push(contact),
            None => rejected.push(index),
        }
    }
    if !rejected.is_empty() {
        return Err(RelayError::Validation(format!(
            "Email is required for every item; missing at indexes {rejected:?}"
        ))
        .into());
    }

    debug!(
        phase = "batch_received",
        request_id,
        destination = %destination.name,
        items_len = contacts.len(),
        "Received batch payload"
    );
    state
        .request_log
        .record(destination.requests_stream(), Value::Array(items));

    let credentials = Credentials::for_destination(destination)?;
    state
        .upstream
        .upsert_batch(&credentials, &contacts)
        .await
        .map_err(BatchFailure::Partial)
}

/// A batch is either a bare array or `{ "secret": .., "items": [..] }`.
fn split_batch_body(body: Value) -> Result<(Vec<Value>, Option<String>), RelayError> {
    match body {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut wrapper) => match wrapper.remove(BATCH_ITEMS_FIELD) {
            Some(Value::Array(items)) => {
                let secret = wrapper
                    .get(SECRET_FIELD)
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned);
                Ok((items, secret))
            }
            _ => Err(RelayError::Validation(format!(
                "request body must be a JSON array or an object with an '{BATCH_ITEMS_FIELD}' array"
            ))),
        },
        _ => Err(RelayError::Validation(
            "request body must be a JSON array".to_string(),
        )),
    }
}

async fn parse_object_body(
    req: &mut Request,
    max_size: usize,
) -> Result<Map<String, Value>, RelayError> {
    match req.parse_json_with_max_size::<Value>(max_size).await {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(_) => Err(RelayError::Validation(
            "request body must be a JSON object".to_string(),
        )),
        Err(error) => Err(RelayError::Validation(format!(
            "invalid request body: {error}"
        ))),
    }
}

fn secret_from_request(req: &Request) -> Option<String> {
    let header_secret = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    header_secret.or_else(|| {
        req.query::<String>(SECRET_FIELD)
            .filter(|value| !value.trim().is_empty())
    })
}

fn authorize(expected: Option<&str>, provided: Option<&str>) -> Result<(), RelayError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match provided {
        Some(provided) if secrets_match(expected, provided) => Ok(()),
        _ => Err(RelayError::Unauthorized),
    }
}

/// Compares digests so the comparison length does not depend on the input.
fn secrets_match(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.trim().as_bytes()) == Sha256::digest(provided.trim().as_bytes())
}

fn obtain_state(depot: &Depot) -> Option<Arc<AppState>> {
    depot.obtain::<Arc<AppState>>().ok().cloned()
}

fn missing_state() -> RelayError {
    RelayError::Configuration("application state is not initialized".to_string())
}

fn missing_destination(name: &str) -> RelayError {
    RelayError::Configuration(format!("destination '{name}' is not configured"))
}

fn log_failure(state: &AppState, destination: &Destination, request_id: &str, error: &RelayError) {
    match error {
        RelayError::Delivery(_) | RelayError::Configuration(_) => error!(
            phase = "webhook_failed",
            request_id,
            destination = %destination.name,
            status = %error.status(),
            "Webhook delivery failed: {error}"
        ),
        RelayError::Validation(_) | RelayError::Unauthorized => warn!(
            phase = "webhook_rejected",
            request_id,
            destination = %destination.name,
            status = %error.status(),
            "Webhook rejected: {error}"
        ),
    }

    if matches!(error, RelayError::Delivery(_) | RelayError::Configuration(_)) {
        state.request_log.record(
            destination.deliveries_stream(),
            json!({
                "request_id": request_id,
                "error": error.to_string(),
                "remote": error.remote_detail(),
            }),
        );
    }
}

fn render_error(res: &mut Response, error: &RelayError) {
    res.status_code(error.status());
    res.render(Json(DetailResponse {
        detail: error.to_string(),
        remote: error.remote_detail().cloned(),
    }));
}

#[derive(Debug, Serialize)]
struct DetailResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<Value>,
}

#[derive(Debug, Serialize)]
struct DeliveryResponse {
    status: &'static str,
    destination: String,
    result: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    status: &'static str,
    destination: String,
    results: Vec<DeliveryResult>,
}

#[derive(Debug, Serialize)]
struct BatchFailureResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<Value>,
    failed_group: usize,
    applied: Vec<DeliveryResult>,
}

#[derive(Debug, Serialize)]
struct HealthCheckResponse {
    status: &'static str,
    timestamp: String,
    destinations: usize,
    shared_secret_configured: bool,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
    log_dir: String,
    destinations: Vec<RootDestination>,
    health: &'static str,
}

#[derive(Debug, Serialize)]
struct RootDestination {
    name: String,
    kind: &'static str,
    route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_route: Option<String>,
    credentials_configured: bool,
}
