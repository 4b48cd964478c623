use std::collections::HashSet;

use regex::Regex;
use serde_json::{Map, Value};

const TAGS_KEY: &str = "tags";

/// Inbound tags: sequences are taken verbatim, strings split on commas.
pub fn parse_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// Tags contributed by top-level keys matching `pattern` with a truthy value.
pub fn extract_pattern_tags(payload: &Map<String, Value>, pattern: &Regex) -> Vec<String> {
    payload
        .iter()
        .filter(|(key, _)| key.as_str() != TAGS_KEY && pattern.is_match(key))
        .filter_map(|(key, value)| truthy_tag(key, value))
        .collect()
}

fn truthy_tag(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => {
            let is_zero = number.as_f64().is_some_and(|value| value == 0.0);
            (!is_zero).then(|| number.to_string())
        }
        Value::Bool(true) => Some(key.to_string()),
        _ => None,
    }
}

/// Defaults first, then each group in order; first occurrence wins and empty
/// strings are dropped. Comparison is case-sensitive.
pub fn merge_tags<'a>(
    default_tags: &'a [String],
    discovered: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    default_tags
        .iter()
        .chain(discovered)
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(*tag))
        .cloned()
        .collect()
}
