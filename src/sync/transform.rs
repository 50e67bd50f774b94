use serde_json::{Number, Value};
use tracing::debug;

use crate::db::schema::ID_FIELD;
use crate::db::{CollectionSchema, FieldDef, FieldKind, Row};

/// Normalizes rows of one collection received from the remote before they
/// replace local state. A returned error aborts the whole pull.
pub trait CollectionTransform: Send + Sync {
    fn transform(&self, schema: &CollectionSchema, rows: Vec<Row>) -> Result<Vec<Row>, String>;
}

/// Default transform driven by the collection schema: coerces scalar shapes,
/// decodes composites the remote sends as JSON text and drops unknown keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaTransform;

impl CollectionTransform for SchemaTransform {
    fn transform(&self, schema: &CollectionSchema, rows: Vec<Row>) -> Result<Vec<Row>, String> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| normalize_row(schema, row).map_err(|e| format!("row {}: {}", i, e)))
            .collect()
    }
}

fn normalize_row(schema: &CollectionSchema, row: Row) -> Result<Row, String> {
    let mut out = Row::new();

    let id = match row.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("missing id".to_string()),
    };
    out.insert(ID_FIELD.to_string(), Value::String(id));

    for (key, value) in row {
        if key == ID_FIELD {
            continue;
        }
        match schema.field(&key) {
            Some(field) => {
                let value = coerce(field, value)
                    .map_err(|e| format!("field '{}': {}", key, e))?;
                out.insert(key, value);
            }
            None => debug!("Dropping unknown field '{}' for '{}'", key, schema.name),
        }
    }

    Ok(out)
}

fn coerce(field: &FieldDef, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }

    match (field.kind, value) {
        (FieldKind::Boolean, Value::Number(n)) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
        (FieldKind::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" | "" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        (FieldKind::Integer, Value::Number(n)) if n.as_i64().is_none() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::from(f as i64))
            .ok_or_else(|| format!("{} is not an integer", n)),
        (FieldKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not an integer", s)),
        (FieldKind::Real, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{}' is not a number", s)),
        (FieldKind::Text | FieldKind::Timestamp, Value::Number(n)) => {
            Ok(Value::String(n.to_string()))
        }
        (FieldKind::Text | FieldKind::Timestamp, Value::Bool(b)) => Ok(Value::String(b.to_string())),
        // Composites not marked as remote-encoded keep string values.
        (FieldKind::Json, Value::String(s)) if field.remote_encoded => {
            serde_json::from_str::<Value>(&s).map_err(|e| format!("invalid JSON text: {}", e))
        }
        (_, value) => Ok(value),
    }
}
