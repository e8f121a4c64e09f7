//! Utility functions for JSON request and response handling

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{Attributes, Value};
use serde_json::{Map, Value as Json};

/// Maximum length of a response body written to logs or errors
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate a body for logging and drop non-printable characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };
    truncated.replace(|c: char| c.is_control(), "")
}

/// Search a JSON document by path
///
/// Segments are separated by `.`; a segment may be double-quoted when the key
/// itself contains dots (`spec."alpha.cce/preInstall"`) and may end with array
/// indexes (`subJobs[0]`).
pub fn path_search<'a>(path: &str, value: &'a Json) -> Option<&'a Json> {
    let mut current = value;
    for segment in split_path(path) {
        let (key, indexes) = split_indexes(&segment);
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }
    if current.is_null() { None } else { Some(current) }
}

/// String at path, or "" when absent
pub fn path_str<'a>(path: &str, value: &'a Json) -> &'a str {
    path_search(path, value)
        .and_then(Json::as_str)
        .unwrap_or_default()
}

pub fn path_i64(path: &str, value: &Json) -> Option<i64> {
    path_search(path, value).and_then(Json::as_i64)
}

pub fn path_bool(path: &str, value: &Json) -> Option<bool> {
    path_search(path, value).and_then(Json::as_bool)
}

/// Items of the array at path; empty when absent
pub fn path_array<'a>(path: &str, value: &'a Json) -> &'a [Json] {
    path_search(path, value)
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in path.chars() {
        match c {
            '"' => quoted = !quoted,
            '.' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn split_indexes(segment: &str) -> (&str, Vec<usize>) {
    let Some(start) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let indexes = segment[start..]
        .split(['[', ']'])
        .filter_map(|s| s.parse().ok())
        .collect();
    (&segment[..start], indexes)
}

/// Drop JSON nulls from an object, recursing into nested objects and arrays
pub fn remove_nil(value: Json) -> Json {
    match value {
        Json::Object(map) => Json::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, remove_nil(v)))
                .collect(),
        ),
        Json::Array(items) => Json::Array(items.into_iter().map(remove_nil).collect()),
        other => other,
    }
}

/// Null for empty strings, zero numbers and empty collections; `false` is kept
pub fn value_ignore_empty(value: Json) -> Json {
    let empty = match &value {
        Json::String(s) => s.is_empty(),
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::Array(items) => items.is_empty(),
        Json::Object(map) => map.is_empty(),
        Json::Bool(_) | Json::Null => false,
    };
    if empty { Json::Null } else { value }
}

/// Base64-encode a string unless it already is valid base64
pub fn try_base64_encode(s: &str) -> String {
    if s.is_empty() || BASE64.decode(s).is_ok() {
        s.to_string()
    } else {
        BASE64.encode(s.as_bytes())
    }
}

/// Decode an attribute holding a JSON document
pub fn json_attribute(attributes: &Attributes, key: &str) -> ProviderResult<Option<Json>> {
    let Some(raw) = attributes.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| ProviderError::wrap(format!("error unmarshalling {}", key), e))
}

/// Convert an attribute value to JSON, treating the zero value as absent
pub fn attr_json(attributes: &Attributes, key: &str) -> Json {
    attributes
        .get(key)
        .map(Value::to_json)
        .map(value_ignore_empty)
        .unwrap_or(Json::Null)
}

/// Set an attribute from JSON, skipping nulls
pub fn set_json(attributes: &mut Attributes, key: &str, value: Option<&Json>) {
    if let Some(v) = value.and_then(Value::from_json) {
        attributes.insert(key.to_string(), v);
    }
}

/// Copy values found at JSON paths onto attributes, as `(attribute, path)` pairs
pub fn set_paths(attributes: &mut Attributes, doc: &Json, pairs: &[(&str, &str)]) {
    for (key, path) in pairs {
        set_json(attributes, key, path_search(path, doc));
    }
}

/// Expand a tag map into `[{"key": k, "value": v}]`, sorted by key
pub fn expand_tags(tags: &HashMap<String, String>) -> Json {
    let mut keys: Vec<&String> = tags.keys().collect();
    keys.sort();
    Json::Array(
        keys.into_iter()
            .map(|k| serde_json::json!({"key": k, "value": tags[k]}))
            .collect(),
    )
}

/// Flatten `[{"key": k, "value": v}]` into a tag map
pub fn flatten_tags(tags: &[Json]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|t| {
            let key = t.get("key")?.as_str()?;
            let value = t.get("value").and_then(Json::as_str).unwrap_or_default();
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Build a JSON object from key/value pairs, dropping nulls
pub fn object(pairs: impl IntoIterator<Item = (&'static str, Json)>) -> Json {
    Json::Object(
        pairs
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.to_string(), v))
            .collect::<Map<String, Json>>(),
    )
}

/// Split an import ID such as `<cluster_id>/<id>` according to a format
///
/// Every part except the last becomes an attribute named after its label. The
/// last part is the cloud-side identifier; it is also kept as an attribute
/// unless its label is `id`.
pub fn parse_import_id(format: &[&str], import_id: &str) -> ProviderResult<(Attributes, String)> {
    let parts: Vec<&str> = import_id.split('/').collect();
    if parts.len() != format.len() || parts.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::new(format!(
            "invalid import ID '{}', want '<{}>'",
            import_id,
            format.join(">/<")
        )));
    }

    let mut attributes = Attributes::new();
    for (label, part) in format.iter().zip(&parts) {
        if *label != "id" {
            attributes.insert(label.to_string(), Value::from(*part));
        }
    }
    let identifier = parts[parts.len() - 1].to_string();
    Ok((attributes, identifier))
}
