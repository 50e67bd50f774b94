//! Sync-aware write surface used by domain services.
//!
//! Every mutation of a sync-tracked collection is committed together with
//! exactly one action log entry, unless the caller opts out through
//! [`WriteOptions`]. The row and its entry land in the same transaction.

use serde_json::Value;
use tracing::debug;

use super::action_log::{ActionKind, ActionLog, ActionLogEntry};
use super::codec::{self, Row};
use super::engine::{prepare_insert, Journal, StorageEngine};
use super::error::StorageResult;
use super::schema::{Record, ID_FIELD, SYNCED_FIELD};

/// Per-call write options.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Append to the action log. Ignored for collections that are not tracked.
    pub track: bool,
    /// Overrides the repository's default user id for the log entry.
    pub user_id: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            track: true,
            user_id: None,
        }
    }
}

impl WriteOptions {
    pub fn untracked() -> Self {
        Self {
            track: false,
            user_id: None,
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            track: true,
            user_id: Some(user_id.into()),
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    engine: StorageEngine,
    log: ActionLog,
    user_id: Option<String>,
}

impl Repository {
    pub fn new(engine: StorageEngine, log: ActionLog) -> Self {
        Self {
            engine,
            log,
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    fn tracks(&self, collection: &str, options: &WriteOptions) -> StorageResult<bool> {
        Ok(options.track && self.engine.schema(collection)?.sync_tracked)
    }

    /// Builds the log entry for a mutation, or `None` when it is not tracked.
    fn journal(
        &self,
        track: bool,
        collection: &str,
        action: ActionKind,
        record_id: Option<String>,
        payload: Value,
        options: &WriteOptions,
    ) -> StorageResult<Option<Journal>> {
        if !track {
            return Ok(None);
        }
        let mut entry = ActionLogEntry::new(collection, action)
            .with_payload(payload)
            .with_user_id(options.user_id.clone().or_else(|| self.user_id.clone()));
        if let Some(record_id) = record_id {
            entry = entry.with_record_id(record_id);
        }
        debug!("Logging {} on '{}' ({:?})", action, collection, entry.record_id);
        ActionLog::journal(&entry)
    }

    pub async fn insert(
        &self,
        collection: &str,
        row: Row,
        options: WriteOptions,
    ) -> StorageResult<Row> {
        let track = self.tracks(collection, &options)?;
        let schema = self.engine.schema(collection)?;
        let row = prepare_insert(&schema, row);
        let id = codec::row_id(&schema, &row)?;

        let journal = self.journal(
            track,
            collection,
            ActionKind::Insert,
            Some(id),
            Value::Object(row.clone()),
            &options,
        )?;
        self.engine.insert_journaled(collection, row, journal).await
    }

    /// Patches a row. Tracked collections have `synced` reset to false.
    /// Returns false, and logs nothing, if the row does not exist.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        mut fields: Row,
        options: WriteOptions,
    ) -> StorageResult<bool> {
        let track = self.tracks(collection, &options)?;
        if self.engine.schema(collection)?.sync_tracked {
            fields.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
        }

        let mut payload = fields.clone();
        payload.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        let journal = self.journal(
            track,
            collection,
            ActionKind::Update,
            Some(id.to_string()),
            Value::Object(payload),
            &options,
        )?;

        let matched = self
            .engine
            .patch_many_journaled(collection, vec![(id.to_string(), fields)], journal)
            .await?;
        Ok(matched > 0)
    }

    /// Inserts the row, or overwrites the fields it carries if the id exists.
    /// Tracked collections have `synced` reset to false.
    pub async fn upsert(
        &self,
        collection: &str,
        mut row: Row,
        options: WriteOptions,
    ) -> StorageResult<Row> {
        let track = self.tracks(collection, &options)?;
        let schema = self.engine.schema(collection)?;
        let id = codec::row_id(&schema, &row)?;
        if schema.sync_tracked {
            row.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
        }

        let journal = self.journal(
            track,
            collection,
            ActionKind::Upsert,
            Some(id),
            Value::Object(row.clone()),
            &options,
        )?;
        self.engine.upsert_journaled(collection, row, journal).await
    }

    /// Deletes a row. Returns false, and logs nothing, if it did not exist.
    pub async fn delete(
        &self,
        collection: &str,
        id: &str,
        options: WriteOptions,
    ) -> StorageResult<bool> {
        let track = self.tracks(collection, &options)?;
        let journal = self.journal(
            track,
            collection,
            ActionKind::Delete,
            Some(id.to_string()),
            serde_json::json!({ ID_FIELD: id }),
            &options,
        )?;

        let removed = self
            .engine
            .remove_many_journaled(collection, vec![id.to_string()], journal)
            .await?;
        Ok(removed > 0)
    }

    /// Inserts rows in one transaction and logs a single `batch_insert`.
    pub async fn insert_many(
        &self,
        collection: &str,
        rows: Vec<Row>,
        options: WriteOptions,
    ) -> StorageResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let track = self.tracks(collection, &options)?;
        let payload = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        let journal = self.journal(
            track,
            collection,
            ActionKind::BatchInsert,
            None,
            payload,
            &options,
        )?;

        self.engine
            .insert_many_journaled(collection, rows, journal)
            .await
    }

    /// Applies several patches in one transaction and logs a single `batch_update`.
    pub async fn update_many(
        &self,
        collection: &str,
        patches: Vec<(String, Row)>,
        options: WriteOptions,
    ) -> StorageResult<u64> {
        if patches.is_empty() {
            return Ok(0);
        }
        let track = self.tracks(collection, &options)?;
        let tracked = self.engine.schema(collection)?.sync_tracked;

        let patches: Vec<(String, Row)> = patches
            .into_iter()
            .map(|(id, mut fields)| {
                if tracked {
                    fields.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
                }
                (id, fields)
            })
            .collect();
        let payload = Value::Array(
            patches
                .iter()
                .map(|(id, fields)| {
                    let mut fields = fields.clone();
                    fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    Value::Object(fields)
                })
                .collect(),
        );
        let journal = self.journal(
            track,
            collection,
            ActionKind::BatchUpdate,
            None,
            payload,
            &options,
        )?;

        self.engine
            .patch_many_journaled(collection, patches, journal)
            .await
    }

    /// Deletes rows in one transaction and logs a single `batch_delete`.
    pub async fn delete_many(
        &self,
        collection: &str,
        ids: Vec<String>,
        options: WriteOptions,
    ) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let track = self.tracks(collection, &options)?;
        let payload = Value::Array(
            ids.iter()
                .map(|id| serde_json::json!({ ID_FIELD: id }))
                .collect(),
        );
        let journal = self.journal(
            track,
            collection,
            ActionKind::BatchDelete,
            None,
            payload,
            &options,
        )?;

        self.engine
            .remove_many_journaled(collection, ids, journal)
            .await
    }

    /// Typed insert.
    pub async fn create<R: Record>(&self, record: &R, options: WriteOptions) -> StorageResult<()> {
        self.insert(R::COLLECTION, codec::to_row(record)?, options)
            .await?;
        debug!("Created {} in '{}'", record.id(), R::COLLECTION);
        Ok(())
    }

    /// Typed upsert.
    pub async fn save<R: Record>(&self, record: &R, options: WriteOptions) -> StorageResult<()> {
        self.upsert(R::COLLECTION, codec::to_row(record)?, options)
            .await?;
        Ok(())
    }
}
