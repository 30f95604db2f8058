//! Tool-facing SAP clients.
//!
//! Each client turns one kind of tool call into a [`ResultEnvelope`]; build
//! failures become rejected envelopes, never errors.
//!
//! [`ResultEnvelope`]: crate::envelope::ResultEnvelope

pub mod customers;
pub mod generic;
pub mod products;

use serde_json::{Map, Value};

// Re-export commonly used types
pub use customers::CustomersClient;
pub use generic::GenericClient;
pub use products::ProductsClient;

/// Entities of an OData v2 or v4 payload, collection or single entity.
fn entities(body: &Value) -> Vec<&Value> {
    let root = body.get("d").unwrap_or(body);
    if let Some(results) = root.get("results").and_then(Value::as_array) {
        return results.iter().collect();
    }
    if let Some(value) = root.get("value") {
        return match value.as_array() {
            Some(items) => items.iter().collect(),
            None => vec![value],
        };
    }
    match root {
        Value::Object(map) if !map.is_empty() => vec![root],
        _ => Vec::new(),
    }
}

/// Project an entity onto `fields`, defaulting missing ones to `""`.
fn pick(entity: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        let value = entity
            .get(*field)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        out.insert(field.to_string(), value);
    }
    Value::Object(out)
}
