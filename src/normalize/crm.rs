use regex::Regex;
use serde_json::{Map, Value};
use tracing::trace;

use super::lookup::{first_present, resolve_text};
use super::tags::{extract_pattern_tags, merge_tags, parse_tags};
use crate::models::CrmContact;

// Precedence is significant: it is the only conflict rule when a payload
// carries the same field under several aliases.
const EMAIL_ALIASES: &[&str] = &["email", "Email", "contact.email"];
const PHONE_ALIASES: &[&str] = &["phone", "Phone", "phone_number", "contact.phone"];
const FIRST_NAME_ALIASES: &[&str] = &[
    "firstName",
    "first_name",
    "firstname",
    "contact.firstName",
    "contact.first_name",
];
const LAST_NAME_ALIASES: &[&str] = &[
    "lastName",
    "last_name",
    "lastname",
    "contact.lastName",
    "contact.last_name",
];
const TAG_ALIASES: &[&str] = &["tags", "contact.tags"];

pub fn normalize_for_crm(
    payload: &Map<String, Value>,
    default_tags: &[String],
    location_id: Option<&str>,
    tag_pattern: Option<&Regex>,
) -> CrmContact {
    let inbound_tags = parse_tags(first_present(payload, TAG_ALIASES));
    let pattern_tags = tag_pattern
        .map(|pattern| extract_pattern_tags(payload, pattern))
        .unwrap_or_default();
    let tags = merge_tags(default_tags, inbound_tags.iter().chain(&pattern_tags));

    let contact = CrmContact {
        email: resolve_text(payload, EMAIL_ALIASES),
        phone: resolve_text(payload, PHONE_ALIASES),
        first_name: resolve_text(payload, FIRST_NAME_ALIASES),
        last_name: resolve_text(payload, LAST_NAME_ALIASES),
        tags,
        location_id: location_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
    };

    trace!(
        phase = "normalize_crm",
        has_email = contact.email.is_some(),
        has_phone = contact.phone.is_some(),
        tags_len = contact.tags.len(),
        "Normalized payload for CRM destination"
    );

    contact
}

#[cfg(test)]
mod tests {
    use super::normalize_for_crm;
    use crate::models::{CrmContact, LogEntry};
    use chrono::Utc;
    use regex::Regex;
    use serde_json::{Map, Value, json};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn defaults() -> Vec<String> {
        vec!["From Account A".to_string()]
    }

    #[test]
    fn email_resolves_identically_across_payload_shapes() {
        let shapes = [
            json!({"email": "ada@example.com"}),
            json!({"Email": "ada@example.com"}),
            json!({"contact": {"email": "ada@example.com"}}),
            json!({"email": "", "contact": {"email": " ada@example.com "}}),
        ];

        for shape in shapes {
            let contact = normalize_for_crm(&object(shape), &[], None, None);
            assert_eq!(contact.email.as_deref(), Some("ada@example.com"));
        }
    }

    #[test]
    fn flat_key_beats_nested_alias() {
        let payload = object(json!({
            "email": "flat@example.com",
            "Email": "cased@example.com",
            "contact": {"email": "nested@example.com", "firstName": "Nested"},
            "first_name": "Snake"
        }));
        let contact = normalize_for_crm(&payload, &[], None, None);

        assert_eq!(contact.email.as_deref(), Some("flat@example.com"));
        assert_eq!(contact.first_name.as_deref(), Some("Snake"));
    }

    #[test]
    fn builds_full_contact_with_default_tags_first() {
        let payload = object(json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "phone": "+1 555 0100",
            "tags": "vip, From Account A, newsletter"
        }));
        let contact = normalize_for_crm(&payload, &defaults(), Some("loc-7"), None);

        assert_eq!(
            contact,
            CrmContact {
                email: None,
                phone: Some("+1 555 0100".to_string()),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                tags: vec![
                    "From Account A".to_string(),
                    "vip".to_string(),
                    "newsletter".to_string()
                ],
                location_id: Some("loc-7".to_string()),
            }
        );
        assert!(contact.has_identity());
    }

    #[test]
    fn payload_without_identity_is_flagged() {
        let payload = object(json!({"firstName": "Ada", "contact": {"phone": "  "}}));
        let contact = normalize_for_crm(&payload, &defaults(), None, None);
        assert!(!contact.has_identity());
    }

    #[test]
    fn pattern_fields_surface_as_tags() {
        let payload = object(json!({
            "email": "ada@example.com",
            "tags": ["existing"],
            "coaching_completed": " Coaching Complete ",
            "coaching_booked": ""
        }));
        let pattern = Regex::new("^coaching_").expect("regex");
        let contact = normalize_for_crm(&payload, &defaults(), None, Some(&pattern));

        assert_eq!(
            contact.tags,
            vec!["From Account A", "existing", "Coaching Complete"]
        );
    }

    #[test]
    fn empty_tag_list_is_omitted_from_output() {
        let payload = object(json!({"email": "ada@example.com", "tags": ""}));
        let contact = normalize_for_crm(&payload, &[], None, None);
        assert_eq!(
            serde_json::to_value(&contact).expect("serialize"),
            json!({"email": "ada@example.com"})
        );
    }

    #[test]
    fn renormalizing_logged_output_is_stable() {
        let payload = object(json!({
            "contact": {"email": "ada@example.com", "first_name": "Ada"},
            "Phone": 15550100,
            "tags": "b, a , b"
        }));
        let first = normalize_for_crm(&payload, &defaults(), Some("loc-1"), None);

        let entry = LogEntry {
            timestamp: Utc::now(),
            payload: serde_json::to_value(&first).expect("serialize"),
        };
        let line = serde_json::to_string(&entry).expect("log line");
        let read_back: LogEntry = serde_json::from_str(&line).expect("parse log line");

        let second = normalize_for_crm(
            read_back.payload.as_object().expect("object"),
            &defaults(),
            Some("loc-1"),
            None,
        );
        assert_eq!(first, second);
    }
}
