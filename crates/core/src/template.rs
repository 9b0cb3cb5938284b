//! `${name}` / `${step.path.0.field}` placeholder resolution for step parameters.
//!
//! Resolution is a single explicit pass run right before a step is dispatched. A
//! placeholder that names nothing known is an error; it is never passed through as
//! literal text.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("unresolved placeholder `${{{0}}}`")]
    Unresolved(String),
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid placeholder regex"))
}

/// Placeholder names referenced anywhere inside `value`.
pub fn placeholders(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_placeholders(value, &mut found);
    found
}

fn collect_placeholders(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            found.extend(
                placeholder_pattern()
                    .captures_iter(text)
                    .filter_map(|captures| captures.get(1))
                    .map(|name| name.as_str().trim().to_string()),
            );
        }
        Value::Array(items) => items.iter().for_each(|item| collect_placeholders(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_placeholders(item, found)),
        _ => {}
    }
}

/// Resolves every placeholder in `value`. Names are looked up in `results` first
/// (step id to payload) and then in `variables`.
///
/// A string that is exactly one placeholder is replaced by the referenced JSON value
/// as-is; placeholders embedded in longer text are rendered as text.
pub fn resolve(
    value: &Value,
    results: &BTreeMap<String, Value>,
    variables: &BTreeMap<String, Value>,
) -> Result<Value, PlaceholderError> {
    match value {
        Value::String(text) => resolve_string(text, results, variables),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, results, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve(item, results, variables)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    text: &str,
    results: &BTreeMap<String, Value>,
    variables: &BTreeMap<String, Value>,
) -> Result<Value, PlaceholderError> {
    let pattern = placeholder_pattern();

    if let Some(captures) = pattern.captures(text) {
        if let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) {
            if whole.start() == 0 && whole.end() == text.len() {
                return lookup(name.as_str().trim(), results, variables).cloned();
            }
        }
    } else {
        return Ok(Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        rendered.push_str(&text[last..whole.start()]);
        match lookup(name.as_str().trim(), results, variables)? {
            Value::String(inner) => rendered.push_str(inner),
            other => rendered.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    rendered.push_str(&text[last..]);
    Ok(Value::String(rendered))
}

fn lookup<'a>(
    name: &str,
    results: &'a BTreeMap<String, Value>,
    variables: &'a BTreeMap<String, Value>,
) -> Result<&'a Value, PlaceholderError> {
    let unresolved = || PlaceholderError::Unresolved(name.to_string());
    let mut segments = name.split('.');
    let root = segments.next().filter(|root| !root.is_empty()).ok_or_else(unresolved)?;
    let mut current = results.get(root).or_else(|| variables.get(root)).ok_or_else(unresolved)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use super::{placeholders, resolve, PlaceholderError};

    fn results() -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "lookup".to_string(),
            json!({ "records": [{ "id": "org-7", "name": "Acme" }], "count": 1 }),
        )])
    }

    fn variables() -> BTreeMap<String, Value> {
        BTreeMap::from([("objective".to_string(), json!("create a deal for Acme"))])
    }

    #[test]
    fn whole_string_placeholder_keeps_json_type() {
        let resolved =
            resolve(&json!({ "org": "${lookup.records.0}" }), &results(), &variables()).unwrap();
        assert_eq!(resolved, json!({ "org": { "id": "org-7", "name": "Acme" } }));
    }

    #[test]
    fn embedded_placeholders_render_as_text() {
        let resolved = resolve(
            &json!(["Found ${lookup.count} for: ${objective}", 42]),
            &results(),
            &variables(),
        )
        .unwrap();
        assert_eq!(resolved, json!(["Found 1 for: create a deal for Acme", 42]));
    }

    #[test]
    fn unknown_names_and_paths_fail() {
        assert_eq!(
            resolve(&json!("${missing}"), &results(), &variables()),
            Err(PlaceholderError::Unresolved("missing".to_string()))
        );
        assert_eq!(
            resolve(&json!("id=${lookup.records.3.id}"), &results(), &variables()),
            Err(PlaceholderError::Unresolved("lookup.records.3.id".to_string()))
        );
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(resolve(&json!("$5000 deal"), &results(), &variables()), Ok(json!("$5000 deal")));
        assert_eq!(
            placeholders(&json!({ "a": "${x} and ${y.z}", "b": ["${w}"] })),
            vec!["x".to_string(), "y.z".to_string(), "w".to_string()]
        );
    }
}
