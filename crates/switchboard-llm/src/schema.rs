//! JSON-Schema normalisation for backends with strict tool-parameter validation.
//!
//! Every object/array node gets an explicit `type`:
//! - `properties` present → `object`
//! - `items` present → `array`
//! - only `enum` present → `string`
//!
//! Array nodes without `items` get `{"type": "string"}`. Sanitising is
//! idempotent and never mutates its input.

use serde_json::{Map, Value, json};

/// Keywords Gemini's function-declaration schema rejects.
pub const GEMINI_UNSUPPORTED_KEYS: &[&str] = &["$schema", "$id", "additionalProperties", "default", "examples"];

const SCHEMA_MAPS: &[&str] = &["properties", "$defs", "definitions"];
const SCHEMA_LISTS: &[&str] = &["anyOf", "oneOf", "allOf"];

/// Recursive schema rewriter.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchemaSanitizer {
    strip_keys: &'static [&'static str],
}

impl SchemaSanitizer {
    /// Sanitiser that also removes `keys` at every level.
    pub fn with_stripped_keys(keys: &'static [&'static str]) -> Self {
        Self { strip_keys: keys }
    }

    /// Sanitised copy of `schema`.
    pub fn sanitize(&self, schema: &Value) -> Value {
        match schema {
            Value::Object(map) => Value::Object(self.sanitize_node(map)),
            other => other.clone(),
        }
    }

    fn sanitize_node(&self, node: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(node.len() + 1);
        for (key, value) in node {
            if self.strip_keys.contains(&key.as_str()) {
                continue;
            }
            let value = match key.as_str() {
                k if SCHEMA_MAPS.contains(&k) => self.sanitize_map(value),
                k if SCHEMA_LISTS.contains(&k) => self.sanitize_list(value),
                "items" => match value {
                    Value::Array(_) => self.sanitize_list(value),
                    other => self.sanitize(other),
                },
                "additionalProperties" if value.is_object() => self.sanitize(value),
                _ => value.clone(),
            };
            let _ = out.insert(key.clone(), value);
        }

        if !out.contains_key("type") {
            if let Some(inferred) = infer_type(&out) {
                let _ = out.insert("type".into(), Value::String(inferred.into()));
            }
        }
        if is_array_type(out.get("type")) && !out.contains_key("items") {
            let _ = out.insert("items".into(), json!({"type": "string"}));
        }
        out
    }

    fn sanitize_map(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(name, schema)| (name.clone(), self.sanitize(schema)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn sanitize_list(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(|s| self.sanitize(s)).collect()),
            other => other.clone(),
        }
    }
}

fn infer_type(node: &Map<String, Value>) -> Option<&'static str> {
    if node.contains_key("properties") {
        Some("object")
    } else if node.contains_key("items") {
        Some("array")
    } else if node.contains_key("enum") {
        Some("string")
    } else {
        None
    }
}

fn is_array_type(ty: Option<&Value>) -> bool {
    match ty {
        Some(Value::String(s)) => s == "array",
        Some(Value::Array(types)) => types.iter().any(|t| t == "array"),
        _ => false,
    }
}

/// Sanitise with no keyword stripping.
pub fn sanitize(schema: &Value) -> Value {
    SchemaSanitizer::default().sanitize(schema)
}
