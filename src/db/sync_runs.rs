use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::codec;
use super::engine::StorageEngine;
use super::error::StorageResult;
use super::schema::{CollectionSchema, FieldDef, Record};

pub const SYNC_RUNS_COLLECTION: &str = "sync_runs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Push,
    Pull,
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKind::Push => write!(f, "push"),
            SyncKind::Pull => write!(f, "pull"),
        }
    }
}

impl FromStr for SyncKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(SyncKind::Push),
            "pull" => Ok(SyncKind::Pull),
            _ => Err(format!(
                "Invalid sync kind '{}'. Valid options: push, pull",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Audit record of one push or pull attempt. Never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SyncKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub items_count: i64,
}

impl SyncRun {
    pub fn success(kind: SyncKind, started_at: DateTime<Utc>, items_count: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            started_at,
            finished_at: Utc::now(),
            status: SyncStatus::Success,
            error_message: None,
            items_count: items_count as i64,
        }
    }

    pub fn failure(kind: SyncKind, started_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            started_at,
            finished_at: Utc::now(),
            status: SyncStatus::Error,
            error_message: Some(message.into()),
            items_count: 0,
        }
    }
}

impl Record for SyncRun {
    const COLLECTION: &'static str = SYNC_RUNS_COLLECTION;

    fn schema() -> CollectionSchema {
        CollectionSchema::local(
            SYNC_RUNS_COLLECTION,
            vec![
                FieldDef::text("type").required(),
                FieldDef::timestamp("started_at").required(),
                FieldDef::timestamp("finished_at").required(),
                FieldDef::text("status").required(),
                FieldDef::text("error_message"),
                FieldDef::integer("items_count").required().with_default("0"),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Append-only audit trail of sync attempts.
#[derive(Clone)]
pub struct SyncRunLog {
    engine: StorageEngine,
}

impl SyncRunLog {
    pub fn new(engine: StorageEngine) -> Self {
        Self { engine }
    }

    pub async fn record(&self, run: &SyncRun) -> StorageResult<()> {
        self.engine
            .insert(SYNC_RUNS_COLLECTION, codec::to_row(run)?)
            .await?;
        Ok(())
    }

    /// All runs, oldest first.
    pub async fn list(&self) -> StorageResult<Vec<SyncRun>> {
        self.engine.all::<SyncRun>().await
    }

    /// Most recent successful run of the given kind, by finish time.
    pub async fn last_success(&self, kind: SyncKind) -> StorageResult<Option<SyncRun>> {
        let filters = [
            ("type", Value::String(kind.to_string())),
            ("status", Value::String(SyncStatus::Success.to_string())),
        ];
        self.engine
            .first_where(
                SYNC_RUNS_COLLECTION,
                &filters,
                "julianday(\"finished_at\") DESC",
            )
            .await?
            .map(codec::from_row)
            .transpose()
    }
}
