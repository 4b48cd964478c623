pub const SERVICE_NAME: &str = "contact-relay";
pub const USER_AGENT_VALUE: &str = "contact-relay-rust/0.1.0";

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const SECRET_FIELD: &str = "secret";
pub const BATCH_ITEMS_FIELD: &str = "items";

pub const GHL_LEGACY_BASE_URL: &str = "https://rest.gohighlevel.com/v1";
pub const GHL_BASE_URL: &str = "https://services.leadconnectorhq.com";
pub const GHL_API_VERSION: &str = "2021-07-28";
pub const GHL_CONTACTS_PATH: &str = "/contacts/";

pub const HUBSPOT_BASE_URL: &str = "https://api.hubapi.com";
pub const HUBSPOT_CONTACTS_PATH: &str = "/crm/v3/objects/contacts";
pub const HUBSPOT_SEARCH_PATH: &str = "/crm/v3/objects/contacts/search";
pub const HUBSPOT_BATCH_UPSERT_PATH: &str = "/crm/v3/objects/contacts/batch/upsert";

/// Upper bound the marketing platform accepts per batch call.
pub const BATCH_LIMIT: usize = 100;

pub const EMAIL_PROPERTY: &str = "email";
pub const DEFAULT_SOURCE_TAG: &str = "From Account A";
