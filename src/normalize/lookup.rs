use serde_json::{Map, Value};

/// Follows a dotted key path (`contact.email`) through nested objects.
pub fn value_at_path<'a>(payload: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = payload.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Text form of a scalar. Strings and numbers only; objects, arrays, booleans
/// and nulls do not carry contact fields.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// First alias whose value has non-whitespace text, trimmed.
pub fn resolve_text<S: AsRef<str>>(payload: &Map<String, Value>, aliases: &[S]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        value_at_path(payload, alias.as_ref())
            .and_then(scalar_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

/// First alias that is present at all, whatever its value.
pub fn first_present<'a, S: AsRef<str>>(
    payload: &'a Map<String, Value>,
    aliases: &[S],
) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| value_at_path(payload, alias.as_ref()))
}
