//! JSON Schema cleanup for Gemini function declarations.
//!
//! MCP servers publish full JSON Schema documents. Gemini accepts an OpenAPI
//! subset and rejects several common keywords, so they are stripped before
//! the declaration is sent.

use serde_json::Value;

/// Keywords Gemini rejects in function parameter schemas.
const UNSUPPORTED_KEYS: &[&str] = &["title", "$schema", "additionalProperties", "default"];

/// Remove unsupported keywords from a schema, recursing into `properties`,
/// `items` and `anyOf`.
pub fn clean_schema(schema: Value) -> Value {
    let Value::Object(mut map) = schema else {
        return schema;
    };

    for key in UNSUPPORTED_KEYS {
        map.remove(*key);
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for value in properties.values_mut() {
            *value = clean_schema(value.take());
        }
    }

    if let Some(items) = map.get_mut("items") {
        *items = clean_schema(items.take());
    }

    if let Some(Value::Array(branches)) = map.get_mut("anyOf") {
        for branch in branches.iter_mut() {
            *branch = clean_schema(branch.take());
        }
    }

    Value::Object(map)
}

/// Schema to send as a declaration's `parameters`, or `None` for an object
/// schema without properties.
pub fn function_parameters(schema: &Value) -> Option<Value> {
    let cleaned = clean_schema(schema.clone());
    let is_object = cleaned.get("type").and_then(Value::as_str) == Some("object");
    let has_properties = cleaned
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| !p.is_empty())
        .unwrap_or(false);

    if is_object && !has_properties {
        None
    } else {
        Some(cleaned)
    }
}
