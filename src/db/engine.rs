//! Collection-oriented storage engine over SQLite.
//!
//! Owns the connection lifecycle (`Uninitialized → Initializing → Ready`, and
//! `Ready → Degraded → Initializing` after a failed liveness check or a lost
//! connection), routes every write through the [`WriteChain`], and retries the
//! transient error kinds with linear backoff.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::codec::{self, bind_all, Row, SqlValue};
use super::error::{StorageError, StorageResult};
use super::migrate::{migrate, MigrationReport};
use super::open_pool;
use super::schema::{
    quote_ident, CollectionSchema, Record, SchemaRegistry, ID_FIELD, LAST_SYNCED_AT_FIELD,
    SYNCED_FIELD,
};
use super::writer::WriteChain;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
}

/// Bounded retry for transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Options for opening the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub write_queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl EngineOptions {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            max_connections: 4,
            write_queue_capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

struct Connection {
    state: ConnectionState,
    pool: Option<SqlitePool>,
    last_migration: Option<MigrationReport>,
}

struct Shared {
    options: EngineOptions,
    registry: Arc<SchemaRegistry>,
    conn: Mutex<Connection>,
}

impl Shared {
    /// Returns a live pool, initializing (and migrating) if needed.
    async fn ensure_ready(&self) -> StorageResult<SqlitePool> {
        let mut conn = self.conn.lock().await;
        if conn.state == ConnectionState::Ready {
            if let Some(pool) = &conn.pool {
                return Ok(pool.clone());
            }
        }

        let previous = conn.state;
        conn.state = ConnectionState::Initializing;
        if let Some(stale) = conn.pool.take() {
            stale.close().await;
        }

        info!(
            "Opening database {} (was {:?})",
            self.options.database_path.display(),
            previous
        );
        match self.initialize().await {
            Ok((pool, report)) => {
                conn.pool = Some(pool.clone());
                conn.last_migration = Some(report);
                conn.state = ConnectionState::Ready;
                Ok(pool)
            }
            Err(e) => {
                error!("Database initialization failed: {}", e);
                conn.state = match previous {
                    ConnectionState::Uninitialized => ConnectionState::Uninitialized,
                    _ => ConnectionState::Degraded,
                };
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> StorageResult<(SqlitePool, MigrationReport)> {
        let pool = open_pool(&self.options.database_path, self.options.max_connections)
            .await
            .map_err(|e| match e {
                StorageError::ConnectionLost(_) => e,
                other => StorageError::ConnectionLost(other.to_string()),
            })?;

        match migrate(&pool, &self.registry).await {
            Ok(report) => Ok((pool, report)),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn mark_degraded(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(pool) = conn.pool.take() {
            pool.close().await;
        }
        if conn.state == ConnectionState::Ready {
            warn!("Database connection degraded");
            conn.state = ConnectionState::Degraded;
        }
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or retries run out.
async fn with_retry<T, F, Fut>(shared: &Shared, mut attempt: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let policy = shared.options.retry;
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay(retries);
                warn!(
                    "Transient storage error (retry {}/{} in {:?}): {}",
                    retries, policy.max_retries, delay, e
                );
                if e.is_connection_loss() {
                    shared.mark_degraded().await;
                }
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// The storage engine. Cheap to clone; clones share one connection and one
/// write chain.
#[derive(Clone)]
pub struct StorageEngine {
    shared: Arc<Shared>,
    chain: WriteChain,
}

impl StorageEngine {
    /// Creates an engine without touching the database. The connection is
    /// opened lazily by the first operation. Must be called inside a tokio
    /// runtime.
    pub fn new(options: EngineOptions, registry: SchemaRegistry) -> Self {
        let chain = WriteChain::spawn(options.write_queue_capacity);
        Self {
            shared: Arc::new(Shared {
                options,
                registry: Arc::new(registry),
                conn: Mutex::new(Connection {
                    state: ConnectionState::Uninitialized,
                    pool: None,
                    last_migration: None,
                }),
            }),
            chain,
        }
    }

    /// Creates an engine and initializes it immediately.
    pub async fn open(options: EngineOptions, registry: SchemaRegistry) -> StorageResult<Self> {
        let engine = Self::new(options, registry);
        engine.init().await?;
        Ok(engine)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    pub fn schema(&self, collection: &str) -> StorageResult<Arc<CollectionSchema>> {
        self.shared.registry.get(collection)
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.conn.lock().await.state
    }

    /// Initializes the connection if needed and returns the report of the
    /// migration that ran when it was opened.
    pub async fn init(&self) -> StorageResult<MigrationReport> {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move {
                with_retry(&shared, || shared.ensure_ready()).await?;
                let conn = shared.conn.lock().await;
                Ok(conn.last_migration.clone().unwrap_or_default())
            })
            .await
    }

    /// Closes the connection. The next operation reopens it.
    pub async fn close(&self) -> StorageResult<()> {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move {
                let mut conn = shared.conn.lock().await;
                if let Some(pool) = conn.pool.take() {
                    pool.close().await;
                }
                conn.state = ConnectionState::Uninitialized;
                info!("Database closed");
                Ok(())
            })
            .await
    }

    /// Liveness check for resume-from-suspend. A failed check tears the
    /// connection down and initializes a fresh one.
    pub async fn resume(&self) -> StorageResult<()> {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move {
                let pool = {
                    let conn = shared.conn.lock().await;
                    match conn.state {
                        ConnectionState::Uninitialized => return Ok(()),
                        ConnectionState::Ready => conn.pool.clone(),
                        _ => None,
                    }
                };

                if let Some(pool) = pool {
                    match sqlx::query("SELECT 1").execute(&pool).await {
                        Ok(_) => return Ok(()),
                        Err(e) => {
                            warn!("Liveness check failed: {}", e);
                            shared.mark_degraded().await;
                        }
                    }
                }

                with_retry(&shared, || shared.ensure_ready()).await.map(|_| ())
            })
            .await
    }

    /// Reinitializes the connection if it is degraded. Returns true if it was.
    pub async fn reinitialize_if_degraded(&self) -> StorageResult<bool> {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move {
                if shared.conn.lock().await.state != ConnectionState::Degraded {
                    return Ok(false);
                }
                with_retry(&shared, || shared.ensure_ready()).await?;
                Ok(true)
            })
            .await
    }

    /// Closes the pool without updating the lifecycle state, simulating a
    /// connection lost while suspended.
    #[cfg(test)]
    pub(crate) async fn sever_connection(&self) {
        if let Some(pool) = &self.shared.conn.lock().await.pool {
            pool.close().await;
        }
    }

    async fn write<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(SqlitePool) -> BoxFuture<'static, StorageResult<T>> + Send + Sync + 'static,
    {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move {
                let shared = &*shared;
                let op = &op;
                with_retry(shared, move || async move {
                    let pool = shared.ensure_ready().await?;
                    op(pool).await
                })
                .await
            })
            .await
    }

    /// Waits for the write chain tail, then hands out the pool.
    async fn settled_pool(&self) -> StorageResult<SqlitePool> {
        let shared = self.shared.clone();
        self.chain
            .run(move || async move { with_retry(&shared, || shared.ensure_ready()).await })
            .await
    }

    async fn read<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: Fn(SqlitePool) -> BoxFuture<'static, StorageResult<T>>,
    {
        let op = &op;
        with_retry(&self.shared, move || async move {
            let pool = self.settled_pool().await?;
            op(pool).await
        })
        .await
    }

    // ========== Reads ==========

    /// Returns every row of a collection in insertion order.
    pub async fn get_all(&self, collection: &str) -> StorageResult<Vec<Row>> {
        let schema = self.schema(collection)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            column_list(&schema),
            quote_ident(schema.name)
        );

        self.read(move |pool: SqlitePool| {
            let schema = schema.clone();
            let sql = sql.clone();
            async move {
                let rows = sqlx::query(&sql).fetch_all(&pool).await?;
                rows.iter()
                    .map(|row| codec::decode_row(&schema, row))
                    .collect()
            }
            .boxed()
        })
        .await
    }

    /// Returns one row by id.
    pub async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Row>> {
        let schema = self.schema(collection)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            column_list(&schema),
            quote_ident(schema.name),
            quote_ident(ID_FIELD)
        );
        let id = id.to_string();

        self.read(move |pool: SqlitePool| {
            let schema = schema.clone();
            let sql = sql.clone();
            let id = id.clone();
            async move {
                let row = sqlx::query(&sql).bind(id).fetch_optional(&pool).await?;
                row.map(|row| codec::decode_row(&schema, &row)).transpose()
            }
            .boxed()
        })
        .await
    }

    /// Number of rows in a collection.
    pub async fn count(&self, collection: &str) -> StorageResult<usize> {
        let schema = self.schema(collection)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(schema.name));

        self.read(move |pool: SqlitePool| {
            let sql = sql.clone();
            async move {
                let count: i64 = sqlx::query_scalar(&sql).fetch_one(&pool).await?;
                Ok(count.max(0) as usize)
            }
            .boxed()
        })
        .await
    }

    /// First row whose columns equal every given value, in `order_by` order.
    pub(crate) async fn first_where(
        &self,
        collection: &str,
        filters: &[(&str, Value)],
        order_by: &str,
    ) -> StorageResult<Option<Row>> {
        let schema = self.schema(collection)?;
        let mut conditions = Vec::with_capacity(filters.len());
        let mut values = Vec::with_capacity(filters.len());
        for (name, value) in filters {
            let field = schema.field(name).ok_or_else(|| {
                StorageError::invalid(schema.name, format!("unknown field '{}'", name))
            })?;
            conditions.push(format!("{} = ?", quote_ident(name)));
            values.push(codec::encode_value(&schema, field, value)?);
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT 1",
            column_list(&schema),
            quote_ident(schema.name),
            where_clause,
            order_by
        );

        self.read(move |pool: SqlitePool| {
            let schema = schema.clone();
            let sql = sql.clone();
            let values = values.clone();
            async move {
                let row = bind_all(sqlx::query(&sql), &values)
                    .fetch_optional(&pool)
                    .await?;
                row.map(|row| codec::decode_row(&schema, &row)).transpose()
            }
            .boxed()
        })
        .await
    }

    /// Typed variant of [`get_all`](Self::get_all).
    pub async fn all<R: Record>(&self) -> StorageResult<Vec<R>> {
        self.get_all(R::COLLECTION)
            .await?
            .into_iter()
            .map(codec::from_row)
            .collect()
    }

    /// Typed variant of [`get`](Self::get).
    pub async fn find<R: Record>(&self, id: &str) -> StorageResult<Option<R>> {
        self.get(R::COLLECTION, id)
            .await?
            .map(codec::from_row)
            .transpose()
    }

    // ========== Writes ==========

    /// Inserts one row. Sync-tracked collections get `synced = false` and
    /// `last_synced_at = null` unless the caller supplied them.
    pub async fn insert(&self, collection: &str, row: Row) -> StorageResult<Row> {
        self.insert_journaled(collection, row, None).await
    }

    /// Like [`insert`](Self::insert), writing `journal` in the same transaction.
    pub async fn insert_journaled(
        &self,
        collection: &str,
        row: Row,
        journal: Option<Journal>,
    ) -> StorageResult<Row> {
        let schema = self.schema(collection)?;
        let row = prepare_insert(&schema, row);
        let statement = Statement::new(insert_sql(&schema), codec::encode_row(&schema, &row)?);
        let journal = self.journal_statement(journal)?;

        self.execute(vec![statement], journal).await?;
        debug!("Inserted into '{}'", collection);
        Ok(row)
    }

    /// Inserts many rows in one transaction.
    pub async fn insert_many(&self, collection: &str, rows: Vec<Row>) -> StorageResult<usize> {
        self.insert_many_journaled(collection, rows, None).await
    }

    pub async fn insert_many_journaled(
        &self,
        collection: &str,
        rows: Vec<Row>,
        journal: Option<Journal>,
    ) -> StorageResult<usize> {
        let schema = self.schema(collection)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(&schema);
        let statements: Vec<Statement> = encode_rows(&schema, rows)?
            .into_iter()
            .map(|values| Statement::new(sql.clone(), values))
            .collect();
        let journal = self.journal_statement(journal)?;

        let inserted = statements.len();
        self.execute(statements, journal).await?;
        Ok(inserted)
    }

    /// Inserts the row, or overwrites the columns it carries if the id
    /// already exists. One statement, so concurrent upserts of the same id
    /// cannot race.
    pub async fn upsert(&self, collection: &str, row: Row) -> StorageResult<Row> {
        self.upsert_journaled(collection, row, None).await
    }

    pub async fn upsert_journaled(
        &self,
        collection: &str,
        row: Row,
        journal: Option<Journal>,
    ) -> StorageResult<Row> {
        let schema = self.schema(collection)?;
        let updated: Vec<String> = schema
            .fields()
            .iter()
            .filter(|field| row.contains_key(field.name))
            .map(|field| format!("{0} = excluded.{0}", quote_ident(field.name)))
            .collect();
        let conflict = if updated.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updated.join(", "))
        };
        let sql = format!(
            "{} ON CONFLICT({}) {}",
            insert_sql(&schema),
            quote_ident(ID_FIELD),
            conflict
        );

        let row = prepare_insert(&schema, row);
        let statement = Statement::new(sql, codec::encode_row(&schema, &row)?);
        let journal = self.journal_statement(journal)?;

        self.execute(vec![statement], journal).await?;
        debug!("Upserted into '{}'", collection);
        Ok(row)
    }

    /// Atomically replaces the whole content of a collection.
    pub async fn replace_all(&self, collection: &str, rows: Vec<Row>) -> StorageResult<usize> {
        self.replace_collections(vec![(collection.to_string(), rows)])
            .await
    }

    /// Replaces the content of several collections in a single transaction.
    /// Either every collection is replaced or none is.
    pub async fn replace_collections(
        &self,
        collections: Vec<(String, Vec<Row>)>,
    ) -> StorageResult<usize> {
        let mut batches = Vec::with_capacity(collections.len());
        for (name, rows) in collections {
            let schema = self.schema(&name)?;
            let encoded = encode_rows(&schema, rows)?;
            batches.push((
                format!("DELETE FROM {}", quote_ident(schema.name)),
                insert_sql(&schema),
                encoded,
            ));
        }

        self.write(move |pool: SqlitePool| {
            let batches = batches.clone();
            async move {
                let mut tx = pool.begin().await?;
                let mut total = 0;
                for (delete, insert, rows) in &batches {
                    sqlx::query(delete).execute(&mut *tx).await?;
                    for values in rows {
                        bind_all(sqlx::query(insert), values)
                            .execute(&mut *tx)
                            .await?;
                    }
                    total += rows.len();
                }
                tx.commit().await?;
                Ok(total)
            }
            .boxed()
        })
        .await
    }

    /// Column-wise update by id. Returns false if no row matched.
    pub async fn patch(&self, collection: &str, id: &str, fields: Row) -> StorageResult<bool> {
        let affected = self
            .patch_many(collection, vec![(id.to_string(), fields)])
            .await?;
        Ok(affected > 0)
    }

    /// Applies several patches in one transaction. Returns matched rows.
    pub async fn patch_many(
        &self,
        collection: &str,
        patches: Vec<(String, Row)>,
    ) -> StorageResult<u64> {
        self.patch_many_journaled(collection, patches, None).await
    }

    /// Like [`patch_many`](Self::patch_many). The journal row is written only
    /// if at least one row matched.
    pub async fn patch_many_journaled(
        &self,
        collection: &str,
        patches: Vec<(String, Row)>,
        journal: Option<Journal>,
    ) -> StorageResult<u64> {
        let schema = self.schema(collection)?;
        let mut statements = Vec::with_capacity(patches.len());

        for (id, mut fields) in patches {
            if let Some(new_id) = fields.remove(ID_FIELD) {
                if new_id != Value::String(id.clone()) {
                    return Err(StorageError::ImmutableId {
                        collection: schema.name.to_string(),
                        id,
                    });
                }
            }
            let columns = codec::encode_patch(&schema, &fields)?;
            if columns.is_empty() {
                debug!("Empty patch for '{}' in '{}'", id, schema.name);
                continue;
            }

            let assignments: Vec<String> = columns
                .iter()
                .map(|(name, _)| format!("{} = ?", quote_ident(name)))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(schema.name),
                assignments.join(", "),
                quote_ident(ID_FIELD)
            );
            let mut values: Vec<SqlValue> = columns.into_iter().map(|(_, v)| v).collect();
            values.push(SqlValue::Text(id));
            statements.push(Statement::new(sql, values));
        }

        if statements.is_empty() {
            return Ok(0);
        }
        let journal = self.journal_statement(journal)?;
        self.execute(statements, journal).await
    }

    /// Deletes a row by id. Returns false if it did not exist.
    pub async fn remove(&self, collection: &str, id: &str) -> StorageResult<bool> {
        let affected = self.remove_many(collection, vec![id.to_string()]).await?;
        Ok(affected > 0)
    }

    /// Deletes several rows in one transaction.
    pub async fn remove_many(&self, collection: &str, ids: Vec<String>) -> StorageResult<u64> {
        self.remove_many_journaled(collection, ids, None).await
    }

    /// Like [`remove_many`](Self::remove_many). The journal row is written
    /// only if at least one row was deleted.
    pub async fn remove_many_journaled(
        &self,
        collection: &str,
        ids: Vec<String>,
        journal: Option<Journal>,
    ) -> StorageResult<u64> {
        let schema = self.schema(collection)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(schema.name),
            quote_ident(ID_FIELD)
        );
        let statements = ids
            .into_iter()
            .map(|id| Statement::new(sql.clone(), vec![SqlValue::Text(id)]))
            .collect();
        let journal = self.journal_statement(journal)?;
        self.execute(statements, journal).await
    }

    fn journal_statement(&self, journal: Option<Journal>) -> StorageResult<Option<Statement>> {
        journal
            .map(|journal| {
                let schema = self.schema(&journal.collection)?;
                let row = prepare_insert(&schema, journal.row);
                Ok(Statement::new(
                    insert_sql(&schema),
                    codec::encode_row(&schema, &row)?,
                ))
            })
            .transpose()
    }

    /// Runs the statements in one transaction and returns the rows they
    /// affected. The journal statement runs last, and only when that count is
    /// non-zero.
    async fn execute(
        &self,
        statements: Vec<Statement>,
        journal: Option<Statement>,
    ) -> StorageResult<u64> {
        self.write(move |pool: SqlitePool| {
            let statements = statements.clone();
            let journal = journal.clone();
            async move {
                let mut tx = pool.begin().await?;
                let mut affected: u64 = 0;
                for statement in &statements {
                    affected += bind_all(sqlx::query(&statement.sql), &statement.values)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                if let Some(journal) = journal.as_ref().filter(|_| affected > 0) {
                    bind_all(sqlx::query(&journal.sql), &journal.values)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(affected)
            }
            .boxed()
        })
        .await
    }

    /// Clears every registered collection. Used for a full local reset.
    pub async fn wipe_all(&self) -> StorageResult<()> {
        let statements: Vec<String> = self
            .registry()
            .schemas()
            .map(|schema| format!("DELETE FROM {}", quote_ident(schema.name)))
            .collect();

        self.write(move |pool: SqlitePool| {
            let statements = statements.clone();
            async move {
                let mut tx = pool.begin().await?;
                for sql in &statements {
                    sqlx::query(sql).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

        info!("Wiped all local collections");
        Ok(())
    }
}

/// A row appended to another collection in the same transaction as a
/// mutation, so the two commit or roll back together.
#[derive(Debug, Clone)]
pub struct Journal {
    pub collection: String,
    pub row: Row,
}

impl Journal {
    pub fn new(collection: impl Into<String>, row: Row) -> Self {
        Self {
            collection: collection.into(),
            row,
        }
    }
}

#[derive(Debug, Clone)]
struct Statement {
    sql: String,
    values: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: String, values: Vec<SqlValue>) -> Self {
        Self { sql, values }
    }
}

fn column_list(schema: &CollectionSchema) -> String {
    schema
        .column_names()
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_sql(schema: &CollectionSchema) -> String {
    let columns = schema.column_names();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(schema.name),
        column_list(schema),
        placeholders
    )
}

pub(crate) fn prepare_insert(schema: &CollectionSchema, mut row: Row) -> Row {
    if schema.sync_tracked {
        row.entry(SYNCED_FIELD).or_insert(Value::Bool(false));
        row.entry(LAST_SYNCED_AT_FIELD).or_insert(Value::Null);
    }
    row
}

fn encode_rows(schema: &CollectionSchema, rows: Vec<Row>) -> StorageResult<Vec<Vec<SqlValue>>> {
    rows.into_iter()
        .map(|row| codec::encode_row(schema, &prepare_insert(schema, row)))
        .collect()
}
