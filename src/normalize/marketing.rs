use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::trace;

use super::lookup::resolve_text;
use crate::constants::EMAIL_PROPERTY;
use crate::models::MarketingContact;

const FLAT_EMAIL_ALIASES: &[&str] = &["email"];
const NESTED_EMAIL_ALIASES: &[&str] = &["email", "contact.email"];

/// How the marketing email is located in the inbound payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailLookup {
    Flat,
    Nested,
}

impl EmailLookup {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Flat => FLAT_EMAIL_ALIASES,
            Self::Nested => NESTED_EMAIL_ALIASES,
        }
    }
}

/// A destination property and the inbound key paths that feed it, in
/// priority order. The property's own name is always tried last so that a
/// normalized contact normalizes to itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyMapping {
    pub property: String,
    pub aliases: Vec<String>,
}

impl PropertyMapping {
    pub fn new<S: AsRef<str>>(property: &str, aliases: &[S]) -> Self {
        let mut mapping = Self {
            property: property.trim().to_string(),
            aliases: aliases
                .iter()
                .map(|alias| alias.as_ref().trim().to_string())
                .filter(|alias| !alias.is_empty())
                .collect(),
        };
        mapping.ensure_self_alias();
        mapping
    }

    fn rename(&mut self, property: &str) {
        self.property = property.to_string();
        self.ensure_self_alias();
    }

    fn ensure_self_alias(&mut self) {
        if !self.aliases.iter().any(|alias| *alias == self.property) {
            self.aliases.push(self.property.clone());
        }
    }
}

/// Per-destination field-name table for the marketing platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketingSchema {
    pub email_lookup: EmailLookup,
    pub properties: Vec<PropertyMapping>,
}

impl MarketingSchema {
    pub fn new(email_lookup: EmailLookup, properties: Vec<PropertyMapping>) -> Self {
        Self {
            email_lookup,
            properties: properties
                .into_iter()
                .filter(|mapping| {
                    !mapping.property.is_empty() && mapping.property != EMAIL_PROPERTY
                })
                .collect(),
        }
    }

    pub fn default_properties() -> Vec<PropertyMapping> {
        vec![
            PropertyMapping::new(
                "firstname",
                &[
                    "firstName",
                    "first_name",
                    "contact.firstName",
                    "contact.first_name",
                ],
            ),
            PropertyMapping::new(
                "lastname",
                &[
                    "lastName",
                    "last_name",
                    "contact.lastName",
                    "contact.last_name",
                ],
            ),
            PropertyMapping::new("phone", &["phone", "Phone", "contact.phone"]),
            PropertyMapping::new("source", &["source", "contact.source"]),
            PropertyMapping::new(
                "coaching_call_completed",
                &["coachingCallCompleted", "coaching_call_completed"],
            ),
            PropertyMapping::new("program_name", &["programName", "program_name"]),
        ]
    }

    /// Renames destination properties, e.g. a workspace that spells
    /// `program_name` as `Program_Name`. Unknown names are ignored.
    pub fn with_renames(mut self, renames: &HashMap<String, String>) -> Self {
        for mapping in &mut self.properties {
            if let Some(renamed) = renames
                .get(&mapping.property)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
            {
                mapping.rename(renamed);
            }
        }
        self
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .map(|mapping| mapping.property.as_str())
    }

    /// First property name that appears twice, counting the email property.
    pub fn duplicate_property(&self) -> Option<&str> {
        let mut seen: HashSet<&str> = HashSet::from([EMAIL_PROPERTY]);
        self.property_names().find(|name| !seen.insert(*name))
    }
}

pub fn normalize_for_marketing(
    payload: &Map<String, Value>,
    schema: &MarketingSchema,
) -> MarketingContact {
    let mut contact = MarketingContact::default();
    contact.properties.insert(
        EMAIL_PROPERTY.to_string(),
        resolve_text(payload, schema.email_lookup.aliases()).unwrap_or_default(),
    );

    for mapping in &schema.properties {
        contact.properties.insert(
            mapping.property.clone(),
            resolve_text(payload, &mapping.aliases).unwrap_or_default(),
        );
    }

    trace!(
        phase = "normalize_marketing",
        has_email = contact.has_email(),
        properties_len = contact.properties.len(),
        "Normalized payload for marketing destination"
    );

    contact
}
