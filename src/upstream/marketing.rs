use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Credentials, UpstreamCall, UpstreamClient};
use crate::constants::{
    BATCH_LIMIT, EMAIL_PROPERTY, HUBSPOT_BATCH_UPSERT_PATH, HUBSPOT_CONTACTS_PATH,
    HUBSPOT_SEARCH_PATH,
};
use crate::errors::UpstreamError;
use crate::models::{DeliveryResult, DeliveryStatus, MarketingContact};

/// A batch upsert stopped at `failed_group`; groups before it were applied.
#[derive(Debug)]
pub struct BatchError {
    pub failed_group: usize,
    pub applied: Vec<DeliveryResult>,
    pub error: UpstreamError,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch group {} failed after {} records were applied: {}",
            self.failed_group,
            self.applied.len(),
            self.error
        )
    }
}

#[derive(Serialize)]
struct PropertiesBody<'a> {
    properties: &'a MarketingContact,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpsertInput<'a> {
    id_property: &'static str,
    id: &'a str,
    properties: &'a MarketingContact,
}

#[derive(Serialize)]
struct BatchUpsertBody<'a> {
    inputs: Vec<BatchUpsertInput<'a>>,
}

impl UpstreamClient {
    /// Search by email, then update the match or create a new record.
    ///
    /// The two steps are not atomic: two concurrent requests for the same
    /// new email can both miss the search and create two records.
    pub async fn upsert_one(
        &self,
        credentials: &Credentials<'_>,
        contact: &MarketingContact,
    ) -> Result<DeliveryResult, UpstreamError> {
        let search_body = json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": EMAIL_PROPERTY,
                    "operator": "EQ",
                    "value": contact.email(),
                }]
            }],
            "properties": contact.property_names(),
            "limit": 1,
        });
        let search = self
            .send_json(
                credentials,
                UpstreamCall::post(HUBSPOT_SEARCH_PATH, "marketing_search"),
                &search_body,
            )
            .await?;

        let body = PropertiesBody {
            properties: contact,
        };

        if let Some(existing_id) = first_search_result_id(&search) {
            let response = self
                .send_json(
                    credentials,
                    UpstreamCall::patch(
                        format!("{HUBSPOT_CONTACTS_PATH}/{existing_id}"),
                        "marketing_update",
                    ),
                    &body,
                )
                .await?;
            info!(
                phase = "marketing_contact_updated",
                destination = credentials.destination,
                contact_id = %existing_id,
                "Existing marketing contact updated"
            );
            return Ok(DeliveryResult::new(
                DeliveryStatus::Updated,
                Some(existing_id),
                response,
            ));
        }

        let response = self
            .send_json(
                credentials,
                UpstreamCall::post(HUBSPOT_CONTACTS_PATH, "marketing_create"),
                &body,
            )
            .await?;
        let id = value_id(&response);
        info!(
            phase = "marketing_contact_created",
            destination = credentials.destination,
            contact_id = id.as_deref().unwrap_or("unknown"),
            "Marketing contact created"
        );
        Ok(DeliveryResult::new(DeliveryStatus::Created, id, response))
    }

    /// Upserts keyed by email in sequential groups of at most [`BATCH_LIMIT`].
    /// The first failing group aborts the rest.
    pub async fn upsert_batch(
        &self,
        credentials: &Credentials<'_>,
        contacts: &[MarketingContact],
    ) -> Result<Vec<DeliveryResult>, BatchError> {
        let mut applied = Vec::with_capacity(contacts.len());

        for (group_index, group) in contacts.chunks(BATCH_LIMIT).enumerate() {
            let body = BatchUpsertBody {
                inputs: group
                    .iter()
                    .map(|contact| BatchUpsertInput {
                        id_property: EMAIL_PROPERTY,
                        id: contact.email(),
                        properties: contact,
                    })
                    .collect(),
            };

            let response = match self
                .send_json(
                    credentials,
                    UpstreamCall::post(HUBSPOT_BATCH_UPSERT_PATH, "marketing_batch_upsert"),
                    &body,
                )
                .await
            {
                Ok(value) => value,
                Err(error) => {
                    warn!(
                        phase = "marketing_batch_aborted",
                        destination = credentials.destination,
                        group_index,
                        applied = applied.len(),
                        remaining = contacts.len().saturating_sub(applied.len()),
                        "Batch upsert group failed; skipping remaining groups"
                    );
                    return Err(BatchError {
                        failed_group: group_index,
                        applied,
                        error,
                    });
                }
            };

            let results = batch_results(&response);
            if let Some(message) = group_failure(&response, results.len(), group.len()) {
                warn!(
                    phase = "marketing_batch_rejected_records",
                    destination = credentials.destination,
                    group_index,
                    group_len = group.len(),
                    results_len = results.len(),
                    "Batch upsert group reported failed records; skipping remaining groups"
                );
                applied.extend(results);
                return Err(BatchError {
                    failed_group: group_index,
                    applied,
                    error: UpstreamError::rejected(message, response),
                });
            }

            info!(
                phase = "marketing_batch_group_done",
                destination = credentials.destination,
                group_index,
                group_len = group.len(),
                results_len = results.len(),
                "Batch upsert group applied"
            );
            applied.extend(results);
        }

        Ok(applied)
    }
}

/// A 207 reply lists per-record failures under `errors`; a short `results`
/// list means some inputs were never applied either way.
fn group_failure(response: &Value, results_len: usize, group_len: usize) -> Option<String> {
    let errors = response
        .get("errors")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let num_errors = response
        .get("numErrors")
        .and_then(Value::as_u64)
        .unwrap_or_default();

    if !errors.is_empty() || num_errors > 0 {
        let failed = num_errors.max(errors.len() as u64);
        let first_message = errors
            .iter()
            .find_map(|error| error.get("message").and_then(Value::as_str))
            .unwrap_or("no error message");
        return Some(format!(
            "batch upsert rejected {failed} of {group_len} records: {first_message}"
        ));
    }
    if results_len < group_len {
        return Some(format!(
            "batch upsert returned {results_len} results for {group_len} records"
        ));
    }
    None
}

fn first_search_result_id(search: &Value) -> Option<String> {
    search
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(value_id)
}

fn value_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn batch_results(response: &Value) -> Vec<DeliveryResult> {
    let Some(results) = response.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .map(|result| {
            let status = if result.get("new").and_then(Value::as_bool) == Some(true) {
                DeliveryStatus::Created
            } else {
                DeliveryStatus::Updated
            };
            DeliveryResult::new(status, value_id(result), Value::Null)
        })
        .collect()
}
