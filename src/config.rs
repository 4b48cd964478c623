use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_SOURCE_TAG, GHL_API_VERSION, GHL_BASE_URL, GHL_LEGACY_BASE_URL, HUBSPOT_BASE_URL,
};
use crate::normalize::{EmailLookup, MarketingSchema, PropertyMapping};

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub request_timeout: u64,
    pub request_body_max_size: usize,
    pub log_dir: PathBuf,
    pub webhook_secret: Option<String>,
    pub destinations: Vec<Destination>,
}

/// One forwarding target: an account on the CRM or a marketing workspace.
#[derive(Clone, Debug)]
pub struct Destination {
    pub name: String,
    /// Route path without the leading slash, e.g. `webhook/ghl`.
    pub path: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub kind: DestinationKind,
}

#[derive(Clone, Debug)]
pub enum DestinationKind {
    Crm(CrmProfile),
    Marketing(MarketingProfile),
}

#[derive(Clone, Debug, Default)]
pub struct CrmProfile {
    /// `Version` header value. Legacy accounts leave this unset.
    pub api_version: Option<String>,
    pub location_id: Option<String>,
    pub default_tags: Vec<String>,
    pub tag_pattern: Option<Regex>,
}

#[derive(Clone, Debug)]
pub struct MarketingProfile {
    pub schema: MarketingSchema,
}

impl Destination {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DestinationKind::Crm(_) => "crm",
            DestinationKind::Marketing(_) => "marketing",
        }
    }

    pub fn requests_stream(&self) -> String {
        format!("{}-requests", self.name)
    }

    pub fn deliveries_stream(&self) -> String {
        format!("{}-deliveries", self.name)
    }
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, Default, Deserialize)]
struct TomlConfigRaw {
    host: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    request_timeout: Option<u64>,
    request_body_max_size: Option<usize>,
    log_dir: Option<String>,
    webhook_secret: Option<String>,
    destinations: Option<Vec<DestinationRaw>>,
}

#[derive(Debug, Default, Deserialize)]
struct DestinationRaw {
    name: String,
    kind: String,
    path: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    api_key_env: Option<String>,
    api_version: Option<String>,
    location_id: Option<String>,
    location_id_env: Option<String>,
    default_tags: Option<Vec<String>>,
    tag_pattern: Option<String>,
    email_lookup: Option<String>,
    properties: Option<Vec<PropertyRaw>>,
    #[serde(default)]
    property_renames: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PropertyRaw {
    property: String,
    #[serde(default)]
    aliases: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let toml_config = read_toml_config("config.toml")?.unwrap_or_default();
        Self::from_sources(toml_config, &|key: &str| env::var(key).ok())
    }

    fn from_sources(toml_config: TomlConfigRaw, env: EnvLookup<'_>) -> Result<Self, String> {
        let host = env("HOST")
            .or(toml_config.host)
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let port = env_u16_with_fallback(env, "PORT", toml_config.port.unwrap_or(8080));
        let log_level = env("LOG_LEVEL")
            .or(toml_config.log_level)
            .unwrap_or_else(|| "INFO".to_string());

        let request_timeout = env_u64_with_fallback(
            env,
            "REQUEST_TIMEOUT",
            toml_config.request_timeout.unwrap_or(15),
        );
        if request_timeout == 0 {
            return Err("REQUEST_TIMEOUT must be > 0".to_string());
        }

        let request_body_max_size = env_usize_with_fallback(
            env,
            "REQUEST_BODY_MAX_SIZE",
            toml_config.request_body_max_size.unwrap_or(1024 * 1024),
        );

        let log_dir = env("LOG_DIR")
            .or(toml_config.log_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs"));

        let webhook_secret = non_empty(env("WEBHOOK_SECRET").or(toml_config.webhook_secret));

        let destinations = match toml_config.destinations {
            Some(raw_destinations) => raw_destinations
                .into_iter()
                .map(|raw| build_destination(raw, env))
                .collect::<Result<Vec<_>, _>>()?,
            None => default_destinations(env),
        };
        validate_destinations(&destinations)?;

        Ok(Self {
            host,
            port,
            log_level,
            request_timeout,
            request_body_max_size,
            log_dir,
            webhook_secret,
            destinations,
        })
    }

    pub fn destination(&self, name: &str) -> Option<&Destination> {
        self.destinations
            .iter()
            .find(|destination| destination.name == name)
    }
}

fn build_destination(raw: DestinationRaw, env: EnvLookup<'_>) -> Result<Destination, String> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err("destination name must not be empty".to_string());
    }

    let path = normalize_route_path(raw.path.as_deref().unwrap_or(&format!("webhook/{name}")));
    let api_key = non_empty(
        raw.api_key_env
            .as_deref()
            .and_then(|key| env(key))
            .or(raw.api_key),
    );

    let (kind, default_base_url) = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "crm" => {
            let tag_pattern = raw
                .tag_pattern
                .as_deref()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|error| {
                        format!("Invalid tag_pattern for destination '{name}': {error}")
                    })
                })
                .transpose()?;
            let location_id = non_empty(
                raw.location_id_env
                    .as_deref()
                    .and_then(|key| env(key))
                    .or(raw.location_id),
            );
            let api_version = non_empty(raw.api_version);
            if api_version.is_none() && location_id.is_some() {
                return Err(format!(
                    "Destination '{name}' sets location_id without api_version; legacy accounts do not take a location"
                ));
            }
            let default_base_url = if api_version.is_some() {
                GHL_BASE_URL
            } else {
                GHL_LEGACY_BASE_URL
            };
            let profile = CrmProfile {
                api_version,
                location_id,
                default_tags: raw.default_tags.unwrap_or_default(),
                tag_pattern,
            };
            (DestinationKind::Crm(profile), default_base_url)
        }
        "marketing" => {
            let email_lookup = parse_email_lookup(raw.email_lookup.as_deref())?;
            let properties = match raw.properties {
                Some(properties) => properties
                    .into_iter()
                    .map(|property| PropertyMapping::new(&property.property, &property.aliases))
                    .collect(),
                None => MarketingSchema::default_properties(),
            };
            let schema = MarketingSchema::new(email_lookup, properties)
                .with_renames(&raw.property_renames);
            (
                DestinationKind::Marketing(MarketingProfile { schema }),
                HUBSPOT_BASE_URL,
            )
        }
        other => {
            return Err(format!(
                "Invalid kind '{other}' for destination '{name}'. Supported values: crm, marketing."
            ));
        }
    };

    let base_url = raw
        .base_url
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_base_url.to_string());

    Ok(Destination {
        name,
        path,
        base_url,
        api_key,
        kind,
    })
}

fn default_destinations(env: EnvLookup<'_>) -> Vec<Destination> {
    vec![
        Destination {
            name: "ghl-legacy".to_string(),
            path: "webhook/ghl-legacy".to_string(),
            base_url: GHL_LEGACY_BASE_URL.to_string(),
            api_key: non_empty(env("GHL_LEGACY_API_KEY")),
            kind: DestinationKind::Crm(CrmProfile {
                default_tags: vec![DEFAULT_SOURCE_TAG.to_string()],
                ..CrmProfile::default()
            }),
        },
        Destination {
            name: "ghl".to_string(),
            path: "webhook/ghl".to_string(),
            base_url: GHL_BASE_URL.to_string(),
            api_key: non_empty(env("GHL_API_KEY")),
            kind: DestinationKind::Crm(CrmProfile {
                api_version: Some(GHL_API_VERSION.to_string()),
                location_id: non_empty(env("GHL_LOCATION_ID")),
                default_tags: vec![DEFAULT_SOURCE_TAG.to_string()],
                tag_pattern: None,
            }),
        },
        Destination {
            name: "hubspot".to_string(),
            path: "webhook/hubspot".to_string(),
            base_url: HUBSPOT_BASE_URL.to_string(),
            api_key: non_empty(env("HUBSPOT_ACCESS_TOKEN")),
            kind: DestinationKind::Marketing(MarketingProfile {
                schema: MarketingSchema::new(
                    EmailLookup::Nested,
                    MarketingSchema::default_properties(),
                ),
            }),
        },
    ]
}

fn validate_destinations(destinations: &[Destination]) -> Result<(), String> {
    let mut names = HashSet::new();
    let mut paths = HashSet::new();

    for destination in destinations {
        if destination.path.is_empty() {
            return Err(format!(
                "Destination '{}' must have a non-root path",
                destination.name
            ));
        }
        if !names.insert(destination.name.as_str()) {
            return Err(format!("Duplicate destination name '{}'", destination.name));
        }
        if !paths.insert(destination.path.as_str()) {
            return Err(format!("Duplicate destination path '/{}'", destination.path));
        }
        if let DestinationKind::Marketing(profile) = &destination.kind {
            if let Some(property) = profile.schema.duplicate_property() {
                return Err(format!(
                    "Destination '{}' maps property '{property}' more than once",
                    destination.name
                ));
            }
        }
    }

    for destination in destinations {
        if !matches!(destination.kind, DestinationKind::Marketing(_)) {
            continue;
        }
        let batch_path = format!("{}/batch", destination.path);
        if let Some(other) = destinations
            .iter()
            .find(|other| other.path == batch_path)
        {
            return Err(format!(
                "Destination '{}' path '/{}' collides with the batch route of '{}'",
                other.name, other.path, destination.name
            ));
        }
    }

    Ok(())
}

fn read_toml_config(path: &str) -> Result<Option<TomlConfigRaw>, String> {
    let config_path = Path::new(path);

    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path)
        .map_err(|error| format!("Failed to read {}: {}", config_path.display(), error))?;

    parse_toml_config(&content)
        .map(Some)
        .map_err(|error| format!("Failed to parse {}: {}", config_path.display(), error))
}

fn parse_toml_config(content: &str) -> Result<TomlConfigRaw, toml::de::Error> {
    toml::from_str::<TomlConfigRaw>(content)
}

fn parse_email_lookup(value: Option<&str>) -> Result<EmailLookup, String> {
    let Some(raw_value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(EmailLookup::Flat);
    };

    match raw_value.to_ascii_lowercase().as_str() {
        "flat" => Ok(EmailLookup::Flat),
        "nested" => Ok(EmailLookup::Nested),
        _ => Err(format!(
            "Invalid email_lookup value '{raw_value}'. Supported values: flat, nested."
        )),
    }
}

fn normalize_route_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u16_with_fallback(env: EnvLookup<'_>, key: &str, fallback: u16) -> u16 {
    env(key)
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(fallback)
}

fn env_u64_with_fallback(env: EnvLookup<'_>, key: &str, fallback: u64) -> u64 {
    env(key)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn env_usize_with_fallback(env: EnvLookup<'_>, key: &str, fallback: usize) -> usize {
    env(key)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::{
        Config, DestinationKind, TomlConfigRaw, parse_email_lookup, parse_toml_config,
    };
    use crate::constants::{GHL_API_VERSION, GHL_BASE_URL, GHL_LEGACY_BASE_URL};
    use crate::normalize::EmailLookup;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn builds_default_destinations_from_environment() {
        let env = env_from(&[
            ("GHL_API_KEY", "pit-123"),
            ("GHL_LOCATION_ID", "loc-9"),
            ("HUBSPOT_ACCESS_TOKEN", "  "),
        ]);
        let config = Config::from_sources(TomlConfigRaw::default(), &env).expect("config");

        assert_eq!(config.request_timeout, 15);
        assert_eq!(config.port, 8080);
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.destinations.len(), 3);

        let ghl = config.destination("ghl").expect("ghl destination");
        assert_eq!(ghl.path, "webhook/ghl");
        assert_eq!(ghl.api_key.as_deref(), Some("pit-123"));
        let DestinationKind::Crm(profile) = &ghl.kind else {
            panic!("ghl should be a crm destination");
        };
        assert_eq!(profile.api_version.as_deref(), Some(GHL_API_VERSION));
        assert_eq!(profile.location_id.as_deref(), Some("loc-9"));

        let legacy = config.destination("ghl-legacy").expect("legacy destination");
        assert!(legacy.api_key.is_none());

        let hubspot = config.destination("hubspot").expect("hubspot destination");
        assert!(hubspot.api_key.is_none(), "blank credentials count as missing");
    }

    #[test]
    fn environment_overrides_toml_scalars() {
        let raw = parse_toml_config(
            r#"
            port = 9000
            request_timeout = 20
            webhook_secret = "from-file"
            "#,
        )
        .expect("toml");
        let env = env_from(&[("PORT", "9100"), ("WEBHOOK_SECRET", "from-env")]);
        let config = Config::from_sources(raw, &env).expect("config");

        assert_eq!(config.port, 9100);
        assert_eq!(config.request_timeout, 20);
        assert_eq!(config.webhook_secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn parses_destination_tables() {
        let raw = parse_toml_config(
            r#"
            [[destinations]]
            name = "account-b"
            kind = "crm"
            path = "/hooks/account-b/"
            api_key_env = "ACCOUNT_B_KEY"
            api_version = "2021-07-28"
            location_id = "loc-b"
            default_tags = ["From Account A"]
            tag_pattern = "(?i)^coaching"

            [[destinations]]
            name = "legacy"
            kind = "crm"
            api_key = "legacy-key"

            [[destinations]]
            name = "workspace-two"
            kind = "marketing"
            email_lookup = "flat"

            [destinations.property_renames]
            program_name = "Program_Name"
            "#,
        )
        .expect("toml");
        let env = env_from(&[("ACCOUNT_B_KEY", "secret-b")]);
        let config = Config::from_sources(raw, &env).expect("config");

        let account_b = config.destination("account-b").expect("account-b");
        assert_eq!(account_b.path, "hooks/account-b");
        assert_eq!(account_b.base_url, GHL_BASE_URL);
        assert_eq!(account_b.api_key.as_deref(), Some("secret-b"));
        let DestinationKind::Crm(profile) = &account_b.kind else {
            panic!("account-b should be crm");
        };
        assert!(profile.tag_pattern.as_ref().expect("pattern").is_match("CoachingDone"));

        let legacy = config.destination("legacy").expect("legacy");
        assert_eq!(legacy.path, "webhook/legacy");
        assert_eq!(legacy.base_url, GHL_LEGACY_BASE_URL);

        let workspace = config.destination("workspace-two").expect("workspace");
        let DestinationKind::Marketing(profile) = &workspace.kind else {
            panic!("workspace-two should be marketing");
        };
        assert_eq!(profile.schema.email_lookup, EmailLookup::Flat);
        assert!(profile.schema.property_names().any(|name| name == "Program_Name"));
        assert!(!profile.schema.property_names().any(|name| name == "program_name"));
    }

    #[test]
    fn rejects_invalid_destinations() {
        let env = env_from(&[]);

        let unknown_kind = parse_toml_config(
            r#"
            [[destinations]]
            name = "x"
            kind = "fax"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(unknown_kind, &env).expect_err("should fail");
        assert!(error.contains("Invalid kind 'fax'"));

        let duplicate_path = parse_toml_config(
            r#"
            [[destinations]]
            name = "a"
            kind = "crm"
            path = "hook"

            [[destinations]]
            name = "b"
            kind = "marketing"
            path = "/hook"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(duplicate_path, &env).expect_err("should fail");
        assert!(error.contains("Duplicate destination path '/hook'"));

        let bad_pattern = parse_toml_config(
            r#"
            [[destinations]]
            name = "a"
            kind = "crm"
            tag_pattern = "(unclosed"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(bad_pattern, &env).expect_err("should fail");
        assert!(error.contains("Invalid tag_pattern for destination 'a'"));
    }

    #[test]
    fn rejects_shadowed_routes_and_properties() {
        let env = env_from(&[]);

        let batch_collision = parse_toml_config(
            r#"
            [[destinations]]
            name = "hubspot"
            kind = "marketing"
            path = "hooks/hubspot"

            [[destinations]]
            name = "crm"
            kind = "crm"
            path = "hooks/hubspot/batch"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(batch_collision, &env).expect_err("should fail");
        assert!(error.contains("collides with the batch route of 'hubspot'"));

        let renamed_twice = parse_toml_config(
            r#"
            [[destinations]]
            name = "hubspot"
            kind = "marketing"

            [destinations.property_renames]
            firstname = "name"
            lastname = "name"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(renamed_twice, &env).expect_err("should fail");
        assert!(error.contains("maps property 'name' more than once"));
    }

    #[test]
    fn legacy_profiles_reject_location_id() {
        let raw = parse_toml_config(
            r#"
            [[destinations]]
            name = "legacy"
            kind = "crm"
            location_id = "loc-1"
            "#,
        )
        .expect("toml");
        let error = Config::from_sources(raw, &env_from(&[])).expect_err("should fail");
        assert!(error.contains("location_id without api_version"));

        let from_env = parse_toml_config(
            r#"
            [[destinations]]
            name = "legacy"
            kind = "crm"
            location_id_env = "LEGACY_LOCATION"
            "#,
        )
        .expect("toml");
        let config = Config::from_sources(from_env, &env_from(&[])).expect("unset env var is fine");
        let DestinationKind::Crm(profile) = &config.destinations[0].kind else {
            panic!("legacy should be crm");
        };
        assert!(profile.location_id.is_none());
    }

    #[test]
    fn rejects_zero_timeout() {
        let env = env_from(&[("REQUEST_TIMEOUT", "0")]);
        let error = Config::from_sources(TomlConfigRaw::default(), &env).expect_err("should fail");
        assert!(error.contains("REQUEST_TIMEOUT"));
    }

    #[test]
    fn parse_email_lookup_accepts_known_modes() {
        assert_eq!(parse_email_lookup(None).expect("default"), EmailLookup::Flat);
        assert_eq!(
            parse_email_lookup(Some(" Nested ")).expect("nested"),
            EmailLookup::Nested
        );
        let error = parse_email_lookup(Some("deep")).expect_err("should fail");
        assert!(error.contains("Invalid email_lookup value 'deep'"));
    }
}
