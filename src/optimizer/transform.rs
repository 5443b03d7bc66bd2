//! JSON response transforms.
//!
//! A [`TransformPipeline`] rewrites a `serde_json::Value` in a fixed order:
//! null removal, camelCase key rewriting, field projection, then whitespace
//! minification of string leaves. Each step applies recursively through
//! nested objects and arrays.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which transforms to apply. Order of application is fixed regardless of
/// how the options are combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Drop object members whose value is null
    #[serde(default)]
    pub remove_nulls: bool,
    /// Rewrite snake_case and kebab-case object keys to camelCase
    #[serde(default)]
    pub camel_case_keys: bool,
    /// Keep only these top-level fields (nested objects are untouched)
    #[serde(default)]
    pub field_filter: Option<Vec<String>>,
    /// Collapse runs of whitespace inside string leaves
    #[serde(default)]
    pub minify_strings: bool,
}

impl TransformOptions {
    pub fn is_noop(&self) -> bool {
        !self.remove_nulls
            && !self.camel_case_keys
            && self.field_filter.is_none()
            && !self.minify_strings
    }
}

/// Applies configured transforms to JSON payloads.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    options: TransformOptions,
}

impl TransformPipeline {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Apply all enabled transforms.
    pub fn apply(&self, mut value: Value) -> Value {
        if self.options.is_noop() {
            return value;
        }
        if self.options.remove_nulls {
            value = remove_nulls(value);
        }
        if self.options.camel_case_keys {
            value = camel_case_keys(value);
        }
        if let Some(fields) = &self.options.field_filter {
            value = project_fields(value, fields);
        }
        if self.options.minify_strings {
            value = minify_strings(value);
        }
        value
    }
}

/// Recursively drop null-valued object members. Array elements are kept
/// even when null, since removal would shift positions.
fn remove_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, remove_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(remove_nulls).collect()),
        other => other,
    }
}

/// Rewrite a snake_case or kebab-case identifier as camelCase. Keys already
/// in camelCase pass through unchanged.
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' || ch == '-' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(to_camel_case(&k), camel_case_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

/// Keep only the named top-level object members. Non-objects pass through.
fn project_fields(value: Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| project_fields(item, fields))
                .collect(),
        ),
        other => other,
    }
}

/// Collapse internal whitespace runs in string leaves and trim the ends.
fn minify_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            Value::String(s.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, minify_strings(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(minify_strings).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remove_nulls_recursive() {
        let pipeline = TransformPipeline::new(TransformOptions {
            remove_nulls: true,
            ..Default::default()
        });

        let out = pipeline.apply(json!({
            "a": 1,
            "b": null,
            "nested": {"c": null, "d": "x"},
            "list": [null, 1]
        }));

        assert_eq!(
            out,
            json!({"a": 1, "nested": {"d": "x"}, "list": [null, 1]})
        );
    }

    #[test]
    fn test_camel_case_keys() {
        let pipeline = TransformPipeline::new(TransformOptions {
            camel_case_keys: true,
            ..Default::default()
        });

        let out = pipeline.apply(json!({
            "user_id": 1,
            "created-at": "now",
            "alreadyCamel": true,
            "nested_obj": {"inner_field": 2}
        }));

        assert_eq!(
            out,
            json!({
                "userId": 1,
                "createdAt": "now",
                "alreadyCamel": true,
                "nestedObj": {"innerField": 2}
            })
        );
    }

    #[test]
    fn test_field_projection() {
        let pipeline = TransformPipeline::new(TransformOptions {
            field_filter: Some(vec!["id".into(), "name".into()]),
            ..Default::default()
        });

        let out = pipeline.apply(json!({"id": 1, "name": "a", "secret": "x"}));
        assert_eq!(out, json!({"id": 1, "name": "a"}));

        // Array elements are projected element-wise
        let out = pipeline.apply(json!([{"id": 1, "x": 2}, {"name": "b", "y": 3}]));
        assert_eq!(out, json!([{"id": 1}, {"name": "b"}]));
    }

    #[test]
    fn test_minify_strings() {
        let pipeline = TransformPipeline::new(TransformOptions {
            minify_strings: true,
            ..Default::default()
        });

        let out = pipeline.apply(json!({"text": "  hello   \n world  "}));
        assert_eq!(out, json!({"text": "hello world"}));
    }

    #[test]
    fn test_fixed_order_nulls_before_projection() {
        // camelCase runs before projection, so the filter must name the
        // rewritten key
        let pipeline = TransformPipeline::new(TransformOptions {
            remove_nulls: true,
            camel_case_keys: true,
            field_filter: Some(vec!["userId".into()]),
            minify_strings: false,
        });

        let out = pipeline.apply(json!({"user_id": 7, "gone": null, "extra": 1}));
        assert_eq!(out, json!({"userId": 7}));
    }

    #[test]
    fn test_noop_passthrough() {
        let pipeline = TransformPipeline::default();
        let input = json!({"a_b": null, "  s ": 1});
        assert_eq!(pipeline.apply(input.clone()), input);
    }

    #[test]
    fn test_to_camel_case_edges() {
        assert_eq!(to_camel_case("user_id"), "userId");
        assert_eq!(to_camel_case("_leading"), "leading");
        assert_eq!(to_camel_case("a__b"), "aB");
        assert_eq!(to_camel_case("plain"), "plain");
    }
}
