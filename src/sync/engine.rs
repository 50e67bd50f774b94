//! Push and pull between the local store and the remote backend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::error::{SyncError, SyncResult};
use super::protocol::{snapshot_rows, PushLog, PushRequest};
use super::scheduler::PushPolicy;
use super::transform::{CollectionTransform, SchemaTransform};
use super::transport::{CredentialProvider, SyncTransport};
use crate::db::schema::{LAST_SYNCED_AT_FIELD, SYNCED_FIELD};
use crate::db::{ActionLog, StorageEngine, SyncKind, SyncRun, SyncRunLog};

/// Result of a push attempt. Push never returns an error; failures are
/// recorded as a failed sync run and reported here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Not due, or nothing to send. No request was made.
    Skipped,
    Pushed { count: usize },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    /// Collections that were replaced.
    pub collections: Vec<String>,
    /// Rows written across all of them.
    pub records: usize,
}

pub struct SyncEngine {
    storage: StorageEngine,
    log: ActionLog,
    runs: SyncRunLog,
    transport: Arc<dyn SyncTransport>,
    credentials: Arc<dyn CredentialProvider>,
    transforms: HashMap<String, Arc<dyn CollectionTransform>>,
    default_transform: Arc<dyn CollectionTransform>,
    policy: PushPolicy,
}

impl SyncEngine {
    pub fn new(
        storage: StorageEngine,
        transport: Arc<dyn SyncTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            log: ActionLog::new(storage.clone()),
            runs: SyncRunLog::new(storage.clone()),
            storage,
            transport,
            credentials,
            transforms: HashMap::new(),
            default_transform: Arc::new(SchemaTransform),
            policy: PushPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses a custom transform for one collection instead of [`SchemaTransform`].
    pub fn with_transform(
        mut self,
        collection: impl Into<String>,
        transform: impl CollectionTransform + 'static,
    ) -> Self {
        self.transforms.insert(collection.into(), Arc::new(transform));
        self
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    pub fn sync_runs(&self) -> &SyncRunLog {
        &self.runs
    }

    async fn bearer_token(&self) -> Option<String> {
        let token = self.credentials.bearer_token().await;
        if token.is_none() {
            warn!("No bearer credential available; the remote will likely reject the request");
        }
        token
    }

    async fn record_run(&self, run: &SyncRun) {
        if let Err(e) = self.runs.record(run).await {
            warn!("Failed to record {} sync run: {}", run.kind, e);
        }
    }

    // ========== Pull ==========

    /// Replaces every tracked collection present in the remote snapshot.
    ///
    /// All collections are transformed before anything is written, and the
    /// replacement runs as one transaction. Errors are recorded as a failed
    /// sync run and returned.
    pub async fn pull(&self) -> SyncResult<PullSummary> {
        let started_at = Utc::now();
        match self.pull_snapshot().await {
            Ok(summary) => {
                info!(
                    "Pulled {} records into {} collections",
                    summary.records,
                    summary.collections.len()
                );
                self.record_run(&SyncRun::success(SyncKind::Pull, started_at, summary.records))
                    .await;
                Ok(summary)
            }
            Err(e) => {
                error!("Pull failed: {}", e);
                self.record_run(&SyncRun::failure(SyncKind::Pull, started_at, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn pull_snapshot(&self) -> SyncResult<PullSummary> {
        let token = self.bearer_token().await;
        let snapshot = self.transport.fetch_snapshot(token.as_deref()).await?;
        let synced_at = Value::String(Utc::now().to_rfc3339());

        let mut replacements = Vec::with_capacity(snapshot.collections.len());
        for (name, value) in snapshot.collections {
            let schema = match self.storage.registry().get(&name) {
                Ok(schema) if schema.sync_tracked => schema,
                Ok(_) => {
                    warn!("Ignoring local-only collection '{}' in snapshot", name);
                    continue;
                }
                Err(_) => {
                    warn!("Ignoring unknown collection '{}' in snapshot", name);
                    continue;
                }
            };

            let transform_error = |message: String| SyncError::Transform {
                collection: name.clone(),
                message,
            };
            let rows = snapshot_rows(&value).map_err(transform_error)?;
            let transform = self
                .transforms
                .get(&name)
                .unwrap_or(&self.default_transform);
            let mut rows = transform
                .transform(&schema, rows)
                .map_err(transform_error)?;

            for row in &mut rows {
                row.insert(SYNCED_FIELD.to_string(), Value::Bool(true));
                row.insert(LAST_SYNCED_AT_FIELD.to_string(), synced_at.clone());
            }
            debug!("Prepared {} rows for '{}'", rows.len(), name);
            replacements.push((name, rows));
        }

        let collections = replacements.iter().map(|(name, _)| name.clone()).collect();
        let records = self.storage.replace_collections(replacements).await?;
        Ok(PullSummary {
            collections,
            records,
        })
    }

    // ========== Push ==========

    /// Pushes every pending log entry regardless of the schedule.
    pub async fn push_now(&self) -> PushOutcome {
        self.push(true).await
    }

    /// Pushes only if the scheduler says it is due.
    pub async fn push_if_due(&self) -> PushOutcome {
        self.push(false).await
    }

    async fn push(&self, force: bool) -> PushOutcome {
        let started_at = Utc::now();
        match self.push_pending(force, started_at).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Push failed: {}", e);
                let message = e.to_string();
                self.record_run(&SyncRun::failure(SyncKind::Push, started_at, &message))
                    .await;
                PushOutcome::Failed { message }
            }
        }
    }

    async fn push_pending(&self, force: bool, started_at: DateTime<Utc>) -> SyncResult<PushOutcome> {
        let pending = self.log.load_pending().await?;
        if !pending.malformed.is_empty() {
            warn!(
                "Leaving {} malformed action log entries out of the push",
                pending.malformed.len()
            );
        }

        if !force {
            let last_success = self
                .runs
                .last_success(SyncKind::Push)
                .await?
                .map(|run| run.finished_at);
            if !self
                .policy
                .should_push(false, pending.entries.len(), last_success, Utc::now())
            {
                debug!("Push not due ({} pending)", pending.entries.len());
                return Ok(PushOutcome::Skipped);
            }
        }

        if pending.entries.is_empty() {
            debug!("Nothing to push");
            return Ok(PushOutcome::Skipped);
        }

        let user_id = self.credentials.user_id();
        let request = PushRequest {
            logs: pending
                .entries
                .iter()
                .map(|entry| {
                    let schema = self.storage.registry().get(&entry.table_name).ok();
                    PushLog::from_entry(entry, schema.as_deref(), user_id.as_deref())
                })
                .collect(),
        };

        let token = self.bearer_token().await;
        let ack = self.transport.push_logs(token.as_deref(), &request).await?;

        let count = request.len();
        self.log.delete(request.ids()).await?;
        info!("Pushed {} logs (remote processed {:?})", count, ack.processed);

        self.record_run(&SyncRun::success(SyncKind::Push, started_at, count))
            .await;
        Ok(PushOutcome::Pushed { count })
    }
}
