use serde_json::Value;
use tracing::info;

use super::{Credentials, UpstreamCall, UpstreamClient};
use crate::constants::GHL_CONTACTS_PATH;
use crate::errors::UpstreamError;
use crate::models::{CrmContact, DeliveryResult, DeliveryStatus};

impl UpstreamClient {
    /// Creates the contact on a CRM account with a single call.
    ///
    /// No lookup by email happens first, so a repeated webhook can create a
    /// duplicate record; the CRM API offers no cheap existence check for
    /// these accounts. Versioned accounts get the `Version` header.
    pub async fn send_contact(
        &self,
        credentials: &Credentials<'_>,
        api_version: Option<&str>,
        contact: &CrmContact,
    ) -> Result<DeliveryResult, UpstreamError> {
        let call = UpstreamCall::post(GHL_CONTACTS_PATH, "crm_create_contact")
            .with_api_version(api_version);
        let response = self.send_json(credentials, call, contact).await?;
        let id = created_contact_id(&response);

        info!(
            phase = "crm_contact_created",
            destination = credentials.destination,
            contact_id = id.as_deref().unwrap_or("unknown"),
            versioned = api_version.is_some(),
            "Contact sent to CRM destination"
        );

        Ok(DeliveryResult::new(DeliveryStatus::Created, id, response))
    }
}

fn created_contact_id(response: &Value) -> Option<String> {
    response
        .get("contact")
        .and_then(|contact| contact.get("id"))
        .or_else(|| response.get("id"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}
