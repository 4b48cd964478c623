use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::EMAIL_PROPERTY;

/// Contact shape accepted by the CRM contacts-create endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

impl CrmContact {
    pub fn has_identity(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}

/// Flat property set sent to the marketing platform. Every configured
/// property is present, unresolved ones as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MarketingContact {
    pub properties: BTreeMap<String, String>,
}

impl MarketingContact {
    pub fn email(&self) -> &str {
        self.properties
            .get(EMAIL_PROPERTY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn has_email(&self) -> bool {
        !self.email().is_empty()
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,
}

impl DeliveryResult {
    pub fn new(status: DeliveryStatus, id: Option<String>, response: Value) -> Self {
        Self {
            status,
            id,
            response,
        }
    }
}

/// One line of a request log file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::{CrmContact, DeliveryResult, DeliveryStatus, MarketingContact};
    use serde_json::{Value, json};

    #[test]
    fn crm_contact_omits_absent_fields() {
        let contact = CrmContact {
            email: Some("ada@example.com".to_string()),
            ..CrmContact::default()
        };

        let value = serde_json::to_value(&contact).expect("serialize");
        assert_eq!(value, json!({"email": "ada@example.com"}));
        assert!(contact.has_identity());
        assert!(!CrmContact::default().has_identity());
    }

    #[test]
    fn crm_contact_uses_camel_case_keys() {
        let contact = CrmContact {
            phone: Some("+15550100".to_string()),
            first_name: Some("Ada".to_string()),
            tags: vec!["vip".to_string()],
            location_id: Some("loc-1".to_string()),
            ..CrmContact::default()
        };

        let value = serde_json::to_value(&contact).expect("serialize");
        assert_eq!(
            value,
            json!({"phone": "+15550100", "firstName": "Ada", "tags": ["vip"], "locationId": "loc-1"})
        );
    }

    #[test]
    fn marketing_contact_serializes_as_flat_map() {
        let mut contact = MarketingContact::default();
        contact
            .properties
            .insert("email".to_string(), "ada@example.com".to_string());
        contact
            .properties
            .insert("firstname".to_string(), String::new());

        assert_eq!(
            serde_json::to_value(&contact).expect("serialize"),
            json!({"email": "ada@example.com", "firstname": ""})
        );
        assert_eq!(contact.email(), "ada@example.com");
        assert_eq!(contact.property_names(), vec!["email", "firstname"]);
    }

    #[test]
    fn delivery_result_serializes_status_lowercase() {
        let result = DeliveryResult::new(DeliveryStatus::Updated, Some("42".to_string()), Value::Null);
        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            json!({"status": "updated", "id": "42"})
        );
    }
}
