//! Serde helpers for flexible deserialization.
//!
//! When the `tracing` feature is enabled, this module also logs any fields the
//! server sends that the frame type does not capture, helping detect protocol drift.

use serde::Deserialize as _;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that reads any JSON value as optional display text.
///
/// Strings pass through, `null` and `false` count as absent, and every other value
/// becomes its JSON text (`42` becomes `"42"`).
///
/// Use with `#[serde_as(as = "TextFromAny")]` on an `Option<String>` field.
pub struct TextFromAny;

impl<'de> serde_with::DeserializeAs<'de, Option<String>> for TextFromAny {
    fn deserialize_as<D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(text) => Some(text),
            Value::Null | Value::Bool(false) => None,
            other => Some(other.to_string()),
        })
    }
}

/// A `serde_as` type that keeps string values and treats anything else as absent.
///
/// Use with `#[serde_as(as = "StringOrNone")]` on an `Option<String>` field.
pub struct StringOrNone;

impl<'de> serde_with::DeserializeAs<'de, Option<String>> for StringOrNone {
    fn deserialize_as<D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(text) => Some(text),
            _ => None,
        })
    }
}

/// Deserialize JSON with unknown field warnings.
///
/// Unknown fields are reported but never cause deserialization to fail. On failure the
/// offending path is logged before the error is returned.
///
/// # Example
///
/// ```ignore
/// let json = serde_json::json!({
///     "message": "hi",
///     "priority": "high"
/// });
/// let frame: WireFrame = deserialize_with_warnings(json)?;
/// // Logs: DEBUG unknown field "priority" with value "high" in WireFrame
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(
    value: Value,
) -> Result<T, serde_json::Error> {
    use std::any::type_name;

    tracing::trace!(
        type_name = %type_name::<T>(),
        json = %value,
        "deserializing JSON"
    );

    // Keep the original so unknown field values can be looked up afterwards
    let original = value.clone();

    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Re-deserialize with serde_path_to_error to get the error path
        let json_str = original.to_string();
        let jd = &mut serde_json::Deserializer::from_str(&json_str);
        let path_result: Result<T, _> = serde_path_to_error::deserialize(jd);
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            let value_display = format_value(lookup_value(&original, &path));

            tracing::warn!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %value_display,
                error = %path_err.inner(),
                "deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        let value_display = format_value(lookup_value(&original, &path));

        tracing::debug!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %value_display,
            "unknown field in inbound frame"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(
    value: Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

/// Look up a value in a JSON structure by a dotted path.
///
/// `?` segments (Option wrappers in `serde_ignored` paths) are skipped and numeric
/// segments index into arrays. Returns `None` if the path does not exist.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in path.split(['.', '[', ']']) {
        if segment.is_empty() || segment == "?" {
            continue;
        }

        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<unable to retrieve>".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        known_field: String,
        #[serde(default)]
        optional_field: Option<i32>,
    }

    #[test]
    fn deserialize_known_fields_only() {
        let value = json!({ "known_field": "value", "optional_field": 42 });

        let sample: Sample = deserialize_with_warnings(value).unwrap();
        assert_eq!(sample.known_field, "value");
        assert_eq!(sample.optional_field, Some(42));
    }

    #[test]
    fn unknown_fields_do_not_fail() {
        let value = json!({ "known_field": "value", "extra": [1, 2, 3] });

        let sample: Sample = deserialize_with_warnings(value).unwrap();
        assert_eq!(sample.optional_field, None);
    }

    #[test]
    fn wrong_type_fails() {
        let value = json!({ "known_field": 12 });

        let result: Result<Sample, _> = deserialize_with_warnings(value);
        assert!(result.is_err(), "numeric known_field must be rejected");
    }

    #[serde_with::serde_as]
    #[derive(Debug, Deserialize)]
    struct Lenient {
        #[serde_as(as = "TextFromAny")]
        #[serde(default)]
        text: Option<String>,
        #[serde_as(as = "StringOrNone")]
        #[serde(default)]
        tag: Option<String>,
    }

    #[test]
    fn text_from_any_stringifies_non_strings() {
        let cases = [
            (json!({ "text": "hi" }), Some("hi")),
            (json!({ "text": 42 }), Some("42")),
            (json!({ "text": 1.5 }), Some("1.5")),
            (json!({ "text": true }), Some("true")),
            (json!({ "text": { "a": 1 } }), Some(r#"{"a":1}"#)),
            (json!({ "text": null }), None),
            (json!({ "text": false }), None),
            (json!({}), None),
        ];

        for (value, expected) in cases {
            let lenient: Lenient = deserialize_with_warnings(value.clone()).unwrap();
            assert_eq!(lenient.text.as_deref(), expected, "{value}");
        }
    }

    #[test]
    fn string_or_none_drops_non_strings() {
        for value in [json!({ "tag": 5 }), json!({ "tag": null }), json!({ "tag": [] })] {
            let lenient: Lenient = deserialize_with_warnings(value).unwrap();
            assert_eq!(lenient.tag, None);
        }

        let lenient: Lenient = deserialize_with_warnings(json!({ "tag": "alert" })).unwrap();
        assert_eq!(lenient.tag.as_deref(), Some("alert"));
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn lookup_value_walks_objects_and_arrays() {
        let value = json!({ "data": { "items": [ { "id": 1 }, { "id": 2 } ] } });

        assert_eq!(lookup_value(&value, "data.items[1].id"), Some(&json!(2)));
        assert_eq!(lookup_value(&value, "data.?.items.0.id"), Some(&json!(1)));
        assert_eq!(lookup_value(&value, "data.missing"), None);
        assert_eq!(format_value(None), "<unable to retrieve>");
    }
}
