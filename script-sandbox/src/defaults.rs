//! Filling tool arguments from parameter schema defaults.

use serde_json::{Map, Value};

/// Returns `args` with every missing property filled from `schema`.
///
/// `schema` is a JSON schema object with a `properties` table. A property
/// missing from `args` takes its `default`; when it has no default but
/// declares nested `properties`, the nested defaults are collected into a
/// fresh object (omitted if there are none). A property present as an object
/// is filled recursively, so only its missing leaves change. Supplied values
/// are never overwritten and the function is idempotent.
#[must_use]
pub fn fill_defaults(schema: &Value, args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(fill_object(schema, map)),
        other => other.clone(),
    }
}

fn fill_object(schema: &Value, args: &Map<String, Value>) -> Map<String, Value> {
    let mut filled = args.clone();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return filled;
    };
    for (name, property) in properties {
        match filled.get_mut(name) {
            Some(Value::Object(existing)) if property.get("properties").is_some() => {
                *existing = fill_object(property, existing);
            }
            Some(_) => {}
            None => {
                if let Some(default) = property.get("default") {
                    filled.insert(name.clone(), fill_defaults(property, default));
                } else if property.get("properties").is_some() {
                    let nested = fill_object(property, &Map::new());
                    if !nested.is_empty() {
                        filled.insert(name.clone(), Value::Object(nested));
                    }
                }
            }
        }
    }
    filled
}

/// Names listed in the schema's `required` array that `args` lacks.
#[must_use]
pub fn missing_required(schema: &Value, args: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Vec::new();
    };
    required
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| args.get(name).is_none())
        .map(str::to_owned)
        .collect()
}
