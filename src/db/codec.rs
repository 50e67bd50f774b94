//! Encoding between JSON rows and SQLite values.

use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row as _, Sqlite};

use super::error::{StorageError, StorageResult};
use super::schema::{CollectionSchema, FieldDef, FieldKind, Record, ID_FIELD};

/// A record in its untyped form: field name to value.
pub type Row = Map<String, Value>;

/// A value ready to be bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub(crate) fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
    }
}

pub(crate) fn bind_all<'q>(mut query: SqliteQuery<'q>, values: &[SqlValue]) -> SqliteQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

/// Reads the record id out of a row.
pub fn row_id(schema: &CollectionSchema, row: &Row) -> StorageResult<String> {
    match row.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StorageError::invalid(schema.name, "missing record id")),
    }
}

/// Encodes one field value for storage.
pub fn encode_value(
    schema: &CollectionSchema,
    field: &FieldDef,
    value: &Value,
) -> StorageResult<SqlValue> {
    let mismatch = || {
        StorageError::invalid(
            schema.name,
            format!("field '{}' expects {}, got {}", field.name, field.kind, value),
        )
    };

    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match field.kind {
        FieldKind::Json => Ok(SqlValue::Text(serde_json::to_string(value)?)),
        FieldKind::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(|i| SqlValue::Integer(i64::from(i != 0)))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FieldKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(SqlValue::Integer)
                .ok_or_else(mismatch),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            _ => Err(mismatch()),
        },
        FieldKind::Real => value.as_f64().map(SqlValue::Real).ok_or_else(mismatch),
        FieldKind::Text | FieldKind::Timestamp => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            _ => Err(mismatch()),
        },
    }
}

/// Encodes a full row in schema column order. Missing fields become NULL,
/// or the column default when the field is not nullable.
pub fn encode_row(schema: &CollectionSchema, row: &Row) -> StorageResult<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(schema.fields().len() + 1);
    values.push(SqlValue::Text(row_id(schema, row)?));

    for field in schema.fields() {
        let value = match row.get(field.name) {
            Some(v) if !v.is_null() => encode_value(schema, field, v)?,
            _ if !field.nullable => default_value(schema, field)?,
            _ => SqlValue::Null,
        };
        values.push(value);
    }

    for key in row.keys() {
        if key != ID_FIELD && schema.field(key).is_none() {
            tracing::debug!("Ignoring unknown field '{}' for '{}'", key, schema.name);
        }
    }

    Ok(values)
}

fn default_value(schema: &CollectionSchema, field: &FieldDef) -> StorageResult<SqlValue> {
    let literal = field.default.ok_or_else(|| {
        StorageError::invalid(schema.name, format!("missing required field '{}'", field.name))
    })?;

    if let Some(text) = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Ok(SqlValue::Text(text.replace("''", "'")));
    }
    if let Ok(i) = literal.parse::<i64>() {
        return Ok(SqlValue::Integer(i));
    }
    if let Ok(f) = literal.parse::<f64>() {
        return Ok(SqlValue::Real(f));
    }
    if literal.eq_ignore_ascii_case("null") {
        return Ok(SqlValue::Null);
    }
    Err(StorageError::invalid(
        schema.name,
        format!("unsupported default '{}' for '{}'", literal, field.name),
    ))
}

/// Encodes the subset of fields present in a partial row, for `UPDATE`.
pub fn encode_patch(
    schema: &CollectionSchema,
    fields: &Row,
) -> StorageResult<Vec<(&'static str, SqlValue)>> {
    let mut columns = Vec::with_capacity(fields.len());
    for field in schema.fields() {
        if let Some(value) = fields.get(field.name) {
            if value.is_null() && !field.nullable {
                return Err(StorageError::invalid(
                    schema.name,
                    format!("field '{}' cannot be null", field.name),
                ));
            }
            columns.push((field.name, encode_value(schema, field, value)?));
        }
    }
    Ok(columns)
}

/// Decodes a stored row back into JSON, restoring booleans and composites.
pub fn decode_row(schema: &CollectionSchema, row: &SqliteRow) -> StorageResult<Row> {
    let mut out = Row::new();
    let id: String = row.try_get(0)?;
    out.insert(ID_FIELD.to_string(), Value::String(id));

    for (i, field) in schema.fields().iter().enumerate() {
        let index = i + 1;
        let value = match field.kind {
            FieldKind::Boolean => row
                .try_get::<Option<i64>, _>(index)?
                .map(|v| Value::Bool(v != 0)),
            FieldKind::Integer => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
            FieldKind::Real => row
                .try_get::<Option<f64>, _>(index)?
                .and_then(Number::from_f64)
                .map(Value::Number),
            FieldKind::Text | FieldKind::Timestamp => {
                row.try_get::<Option<String>, _>(index)?.map(Value::String)
            }
            FieldKind::Json => match row.try_get::<Option<String>, _>(index)? {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
        };
        out.insert(field.name.to_string(), value.unwrap_or(Value::Null));
    }

    Ok(out)
}

/// Converts a typed record into a row.
pub fn to_row<R: Record>(record: &R) -> StorageResult<Row> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::invalid(
            R::COLLECTION,
            format!("record serialized to non-object {}", other),
        )),
    }
}

/// Converts a row back into a typed record.
pub fn from_row<R: Record>(row: Row) -> StorageResult<R> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            "workouts",
            vec![
                FieldDef::text("name").required().with_default("'untitled'"),
                FieldDef::integer("duration"),
                FieldDef::real("distance"),
                FieldDef::boolean("completed").required().with_default("0"),
                FieldDef::json("exercises"),
            ],
        )
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_encode_row_in_schema_order() {
        let values = encode_row(
            &schema(),
            &row(json!({
                "id": "w1",
                "name": "Leg day",
                "duration": 45,
                "distance": 1.5,
                "completed": true,
                "exercises": [{"name": "squat", "sets": [5, 5, 5]}],
                "synced": false
            })),
        )
        .unwrap();

        assert_eq!(
            values,
            vec![
                SqlValue::Text("w1".into()),
                SqlValue::Text("Leg day".into()),
                SqlValue::Integer(45),
                SqlValue::Real(1.5),
                SqlValue::Integer(1),
                SqlValue::Text(r#"[{"name":"squat","sets":[5,5,5]}]"#.into()),
                SqlValue::Integer(0),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn test_missing_required_field_uses_default() {
        let values = encode_row(&schema(), &row(json!({"id": "w1"}))).unwrap();
        assert_eq!(values[1], SqlValue::Text("untitled".into()));
        assert_eq!(values[4], SqlValue::Integer(0));
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let err = encode_row(&schema(), &row(json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = encode_row(&schema(), &row(json!({"id": "w1", "duration": "long"}))).unwrap_err();
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn test_encode_patch_only_present_fields() {
        let columns = encode_patch(&schema(), &row(json!({"completed": false, "bogus": 1}))).unwrap();
        assert_eq!(columns, vec![("completed", SqlValue::Integer(0))]);
    }

    #[test]
    fn test_patch_rejects_null_for_required() {
        assert!(encode_patch(&schema(), &row(json!({"name": null}))).is_err());
    }
}
