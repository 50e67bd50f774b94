use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec;
use super::engine::{Journal, StorageEngine};
use super::error::StorageResult;
use super::schema::{CollectionSchema, FieldDef, Record};

/// Backing table of the action log.
pub const ACTION_LOG_COLLECTION: &str = "action_log";

/// Kind of local mutation recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
    BatchInsert,
    BatchUpdate,
    BatchDelete,
    Upsert,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Insert => write!(f, "insert"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Delete => write!(f, "delete"),
            ActionKind::BatchInsert => write!(f, "batch_insert"),
            ActionKind::BatchUpdate => write!(f, "batch_update"),
            ActionKind::BatchDelete => write!(f, "batch_delete"),
            ActionKind::Upsert => write!(f, "upsert"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(ActionKind::Insert),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            "batch_insert" => Ok(ActionKind::BatchInsert),
            "batch_update" => Ok(ActionKind::BatchUpdate),
            "batch_delete" => Ok(ActionKind::BatchDelete),
            "upsert" => Ok(ActionKind::Upsert),
            _ => Err(format!(
                "Invalid action '{}'. Valid options: insert, update, delete, \
                 batch_insert, batch_update, batch_delete, upsert",
                s
            )),
        }
    }
}

/// One pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub table_name: String,
    pub action: ActionKind,
    pub record_id: Option<String>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
}

impl ActionLogEntry {
    pub fn new(table_name: impl Into<String>, action: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            table_name: table_name.into(),
            action,
            record_id: None,
            payload: None,
            created_at: Utc::now(),
            synced: false,
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

impl Record for ActionLogEntry {
    const COLLECTION: &'static str = ACTION_LOG_COLLECTION;

    fn schema() -> CollectionSchema {
        CollectionSchema::local(
            ACTION_LOG_COLLECTION,
            vec![
                FieldDef::text("user_id"),
                FieldDef::text("table_name").required().with_default("''"),
                FieldDef::text("action").required().with_default("''"),
                FieldDef::text("record_id"),
                FieldDef::json("payload"),
                FieldDef::timestamp("created_at").required(),
                FieldDef::boolean("synced").required().with_default("0"),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Result of reading the log: well-formed entries in append order, plus the
/// ids of rows that could not be interpreted.
#[derive(Debug, Default)]
pub struct PendingActions {
    pub entries: Vec<ActionLogEntry>,
    pub malformed: Vec<String>,
}

/// Durable queue of local mutations awaiting push.
#[derive(Clone)]
pub struct ActionLog {
    engine: StorageEngine,
}

impl ActionLog {
    pub fn new(engine: StorageEngine) -> Self {
        Self { engine }
    }

    /// Appends an entry. Entries targeting the log's own table are ignored
    /// and yield `None`.
    pub async fn append(&self, entry: ActionLogEntry) -> StorageResult<Option<ActionLogEntry>> {
        let journal = match Self::journal(&entry)? {
            Some(journal) => journal,
            None => return Ok(None),
        };

        self.engine
            .insert(&journal.collection, journal.row)
            .await?;
        debug!(
            "Logged {} on '{}' ({:?})",
            entry.action, entry.table_name, entry.record_id
        );
        Ok(Some(entry))
    }

    /// Converts an entry into a journal row, so it commits in the same
    /// transaction as the mutation it describes. `None` for the log's own
    /// table.
    pub fn journal(entry: &ActionLogEntry) -> StorageResult<Option<Journal>> {
        if entry.table_name == ACTION_LOG_COLLECTION {
            debug!("Skipping action log entry for the action log itself");
            return Ok(None);
        }
        Ok(Some(Journal::new(
            ACTION_LOG_COLLECTION,
            codec::to_row(entry)?,
        )))
    }

    /// Reads every entry in append order, separating out malformed rows.
    pub async fn load_pending(&self) -> StorageResult<PendingActions> {
        let rows = self.engine.get_all(ACTION_LOG_COLLECTION).await?;
        let mut pending = PendingActions::default();

        for row in rows {
            let label = row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<no id>")
                .to_string();

            match codec::from_row::<ActionLogEntry>(row) {
                Ok(entry) if !entry.id.is_empty() && !entry.table_name.is_empty() => {
                    pending.entries.push(entry)
                }
                Ok(_) => {
                    warn!("Malformed action log entry {}: missing table", label);
                    pending.malformed.push(label);
                }
                Err(e) => {
                    warn!("Malformed action log entry {}: {}", label, e);
                    pending.malformed.push(label);
                }
            }
        }

        Ok(pending)
    }

    /// Deletes acknowledged entries.
    pub async fn delete(&self, ids: Vec<String>) -> StorageResult<u64> {
        self.engine.remove_many(ACTION_LOG_COLLECTION, ids).await
    }

    pub async fn count(&self) -> StorageResult<usize> {
        self.engine.count(ACTION_LOG_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EngineOptions, SchemaRegistry};
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        log: ActionLog,
        engine: StorageEngine,
        _temp_dir: TempDir,
    }

    fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let engine = StorageEngine::new(
            EngineOptions::new(temp_dir.path().join("log.db")),
            SchemaRegistry::new().register::<ActionLogEntry>(),
        );
        TestContext {
            log: ActionLog::new(engine.clone()),
            engine,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_action_kind_display_and_parse() {
        assert_eq!(ActionKind::BatchInsert.to_string(), "batch_insert");
        assert_eq!(ActionKind::from_str("UPSERT").unwrap(), ActionKind::Upsert);
        assert!(ActionKind::from_str("merge").is_err());
        assert_eq!(
            serde_json::to_string(&ActionKind::BatchDelete).unwrap(),
            "\"batch_delete\""
        );
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let ctx = setup();
        let entry = ActionLogEntry::new("meals", ActionKind::Insert)
            .with_record_id("m1")
            .with_payload(json!({"id": "m1", "name": "Oats"}))
            .with_user_id(Some("u1".to_string()));

        let stored = ctx.log.append(entry.clone()).await.unwrap().unwrap();
        assert_eq!(stored.id, entry.id);

        let pending = ctx.log.load_pending().await.unwrap();
        assert!(pending.malformed.is_empty());
        assert_eq!(pending.entries.len(), 1);
        assert_eq!(pending.entries[0].table_name, "meals");
        assert_eq!(pending.entries[0].action, ActionKind::Insert);
        assert_eq!(pending.entries[0].record_id.as_deref(), Some("m1"));
        assert_eq!(pending.entries[0].payload, Some(json!({"id": "m1", "name": "Oats"})));
        assert!(!pending.entries[0].synced);
    }

    #[tokio::test]
    async fn test_append_for_own_table_is_noop() {
        let ctx = setup();
        let result = ctx
            .log
            .append(ActionLogEntry::new(ACTION_LOG_COLLECTION, ActionKind::Insert))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(ctx.log.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_separated() {
        let ctx = setup();
        ctx.log
            .append(ActionLogEntry::new("meals", ActionKind::Delete).with_record_id("m1"))
            .await
            .unwrap();

        let bad_action = json!({
            "id": "bad-1",
            "table_name": "meals",
            "action": "explode",
            "created_at": "2024-01-01T00:00:00Z"
        });
        let no_table = json!({
            "id": "bad-2",
            "action": "insert",
            "created_at": "2024-01-01T00:00:00Z"
        });
        for row in [bad_action, no_table] {
            ctx.engine
                .insert(ACTION_LOG_COLLECTION, row.as_object().cloned().unwrap())
                .await
                .unwrap();
        }

        let pending = ctx.log.load_pending().await.unwrap();
        assert_eq!(pending.entries.len(), 1);
        assert_eq!(pending.malformed, vec!["bad-1", "bad-2"]);
    }

    #[tokio::test]
    async fn test_delete_removes_only_given_entries() {
        let ctx = setup();
        let a = ctx
            .log
            .append(ActionLogEntry::new("meals", ActionKind::Insert))
            .await
            .unwrap()
            .unwrap();
        ctx.log
            .append(ActionLogEntry::new("meals", ActionKind::Update))
            .await
            .unwrap();

        assert_eq!(ctx.log.delete(vec![a.id.clone()]).await.unwrap(), 1);

        let pending = ctx.log.load_pending().await.unwrap();
        assert_eq!(pending.entries.len(), 1);
        assert_eq!(pending.entries[0].action, ActionKind::Update);
    }
}
