//! Wire types exchanged with the remote backend.
//!
//! Pull returns one JSON object keyed by collection name, each value either an
//! array of records or a single record. Push sends `{ "logs": [...] }` where
//! every log carries a remote verb instead of the local action kind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::schema::{LAST_SYNCED_AT_FIELD, SYNCED_FIELD};
use crate::db::{ActionKind, ActionLogEntry, CollectionSchema, Row};

/// Field injected into pushed payloads when absent.
pub const USER_ID_FIELD: &str = "user_id";

/// Mutation vocabulary understood by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteVerb {
    Create,
    Update,
    Delete,
}

impl From<ActionKind> for RemoteVerb {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Insert | ActionKind::BatchInsert => RemoteVerb::Create,
            ActionKind::Update | ActionKind::Upsert | ActionKind::BatchUpdate => {
                RemoteVerb::Update
            }
            ActionKind::Delete | ActionKind::BatchDelete => RemoteVerb::Delete,
        }
    }
}

/// One entry of a push batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushLog {
    pub id: String,
    pub table_name: String,
    pub action: RemoteVerb,
    pub record_id: Option<String>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl PushLog {
    /// Builds the wire form of a log entry, sanitizing its payload.
    pub fn from_entry(
        entry: &ActionLogEntry,
        schema: Option<&CollectionSchema>,
        user_id: Option<&str>,
    ) -> Self {
        Self {
            id: entry.id.clone(),
            table_name: entry.table_name.clone(),
            action: entry.action.into(),
            record_id: entry.record_id.clone(),
            payload: entry
                .payload
                .as_ref()
                .map(|payload| sanitize_payload(payload, schema, user_id)),
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub logs: Vec<PushLog>,
}

impl PushRequest {
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.logs.iter().map(|log| log.id.clone()).collect()
    }
}

/// Acknowledgement of a push. The remote may answer with an empty body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushAck {
    #[serde(default)]
    pub processed: Option<usize>,
}

/// Full remote state, keyed by collection name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub collections: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn with(mut self, collection: impl Into<String>, value: Value) -> Self {
        self.collections.insert(collection.into(), value);
        self
    }
}

/// Normalizes one snapshot value into rows: arrays as-is, a single object as
/// a one-row collection, null as empty.
pub fn snapshot_rows(value: &Value) -> Result<Vec<Row>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![map.clone()]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(format!("item {} is not an object: {}", i, other)),
            })
            .collect(),
        other => Err(format!("expected array or object, got {}", other)),
    }
}

/// Strips fields the remote does not accept and injects the user id.
///
/// Local-only fields come from the collection schema when known; otherwise
/// the sync bookkeeping fields are removed. Arrays are sanitized per element.
pub fn sanitize_payload(
    payload: &Value,
    schema: Option<&CollectionSchema>,
    user_id: Option<&str>,
) -> Value {
    match payload {
        Value::Object(map) => {
            let mut clean = map.clone();
            match schema {
                Some(schema) => {
                    for field in schema.fields().iter().filter(|f| f.local_only) {
                        clean.remove(field.name);
                    }
                }
                None => {
                    clean.remove(SYNCED_FIELD);
                    clean.remove(LAST_SYNCED_AT_FIELD);
                }
            }
            if let Some(user_id) = user_id {
                let missing = clean.get(USER_ID_FIELD).map_or(true, Value::is_null);
                if missing {
                    clean.insert(USER_ID_FIELD.to_string(), Value::String(user_id.to_string()));
                }
            }
            Value::Object(clean)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_payload(item, schema, user_id))
                .collect(),
        ),
        other => other.clone(),
    }
}
