//! Idempotent schema migration.
//!
//! The live table layout is compared against the registry. Additive changes
//! use `ALTER TABLE ADD COLUMN`; anything SQLite cannot alter in place is
//! rebuilt by rename, create, copy, drop. The whole run is one transaction.

use std::collections::HashSet;

use sqlx::{Row as _, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use super::error::{StorageError, StorageResult};
use super::schema::{quote_ident, CollectionSchema, FieldDef, SchemaRegistry, ID_FIELD};

/// Summary of what a migration run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<String>,
    pub tables_rebuilt: Vec<String>,
    /// Number of DDL statements executed.
    pub statements: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.statements == 0
    }
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct LiveColumn {
    name: String,
    notnull: bool,
    has_default: bool,
    pk: bool,
}

#[derive(Debug)]
struct LiveTable {
    columns: Vec<LiveColumn>,
    unique: HashSet<String>,
}

impl LiveTable {
    fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, PartialEq)]
enum Plan {
    Create,
    AddColumns(Vec<FieldDef>),
    Rebuild(String),
}

/// Brings every registered table up to date.
pub async fn migrate(pool: &SqlitePool, registry: &SchemaRegistry) -> StorageResult<MigrationReport> {
    let mut tx = pool.begin().await?;

    match migrate_in(&mut tx, registry).await {
        Ok(report) => {
            tx.commit().await?;
            if report.is_noop() {
                debug!("Schema is current, no migration needed");
            } else {
                info!(
                    "Migration applied: {} created, {} columns added, {} rebuilt",
                    report.tables_created.len(),
                    report.columns_added.len(),
                    report.tables_rebuilt.len()
                );
            }
            Ok(report)
        }
        Err(e) => {
            warn!("Migration failed, rolling back: {}", e);
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback after failed migration also failed: {}", rollback);
            }
            Err(e)
        }
    }
}

async fn migrate_in(
    tx: &mut Transaction<'_, Sqlite>,
    registry: &SchemaRegistry,
) -> StorageResult<MigrationReport> {
    let mut report = MigrationReport::default();

    for schema in registry.schemas() {
        let live = inspect(tx, schema.name).await?;
        let plan = match live {
            None => Some(Plan::Create),
            Some(live) => plan_for(schema, &live),
        };

        let Some(plan) = plan else { continue };
        debug!("Migrating '{}': {:?}", schema.name, plan);

        apply(tx, schema, plan, &mut report)
            .await
            .map_err(|e| StorageError::Migration {
                table: schema.name.to_string(),
                message: e.to_string(),
            })?;
    }

    Ok(report)
}

async fn inspect(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
) -> StorageResult<Option<LiveTable>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(&mut **tx)
        .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(LiveColumn {
            name: row.try_get("name")?,
            notnull: row.try_get::<i64, _>("notnull")? != 0,
            has_default: row.try_get::<Option<String>, _>("dflt_value")?.is_some(),
            pk: row.try_get::<i64, _>("pk")? != 0,
        });
    }

    let mut unique = HashSet::new();
    let indexes = sqlx::query(&format!("PRAGMA index_list({})", quote_ident(table)))
        .fetch_all(&mut **tx)
        .await?;
    for index in indexes {
        let is_unique = index.try_get::<i64, _>("unique")? != 0;
        let origin: String = index.try_get("origin")?;
        if !is_unique || origin != "u" {
            continue;
        }
        let name: String = index.try_get("name")?;
        let cols = sqlx::query(&format!("PRAGMA index_info({})", quote_ident(&name)))
            .fetch_all(&mut **tx)
            .await?;
        // Only single-column constraints are declared by the registry.
        if cols.len() == 1 {
            unique.insert(cols[0].try_get::<String, _>("name")?);
        }
    }

    Ok(Some(LiveTable { columns, unique }))
}

fn plan_for(schema: &CollectionSchema, live: &LiveTable) -> Option<Plan> {
    let pk: Vec<&str> = live
        .columns
        .iter()
        .filter(|c| c.pk)
        .map(|c| c.name.as_str())
        .collect();
    if pk != [ID_FIELD] {
        return Some(Plan::Rebuild(format!("primary key is {:?}", pk)));
    }

    let mut missing = Vec::new();
    for field in schema.fields() {
        match live.column(field.name) {
            Some(col) => {
                if col.notnull == field.nullable {
                    return Some(Plan::Rebuild(format!(
                        "nullability of '{}' changed",
                        field.name
                    )));
                }
                if live.unique.contains(field.name) != field.unique {
                    return Some(Plan::Rebuild(format!(
                        "unique constraint on '{}' changed",
                        field.name
                    )));
                }
            }
            None => {
                if field.unique || (!field.nullable && field.default.is_none()) {
                    return Some(Plan::Rebuild(format!(
                        "column '{}' cannot be added in place",
                        field.name
                    )));
                }
                missing.push(field.clone());
            }
        }
    }

    let declared: HashSet<&str> = schema.column_names().into_iter().collect();
    for col in &live.columns {
        if !declared.contains(col.name.as_str()) && col.notnull && !col.has_default {
            return Some(Plan::Rebuild(format!(
                "stray required column '{}'",
                col.name
            )));
        }
    }

    if missing.is_empty() {
        None
    } else {
        Some(Plan::AddColumns(missing))
    }
}

async fn execute(
    tx: &mut Transaction<'_, Sqlite>,
    sql: &str,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    debug!("DDL: {}", sql);
    sqlx::query(sql).execute(&mut **tx).await?;
    report.statements += 1;
    Ok(())
}

async fn apply(
    tx: &mut Transaction<'_, Sqlite>,
    schema: &CollectionSchema,
    plan: Plan,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    let table = schema.name;
    match plan {
        Plan::Create => {
            execute(tx, &schema.create_table_sql(table), report).await?;
            report.tables_created.push(table.to_string());
        }
        Plan::AddColumns(fields) => {
            for field in fields {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    field.column_sql()
                );
                execute(tx, &sql, report).await?;
                report.columns_added.push(format!("{}.{}", table, field.name));
            }
        }
        Plan::Rebuild(reason) => {
            info!("Rebuilding '{}': {}", table, reason);
            rebuild(tx, schema, report).await?;
            report.tables_rebuilt.push(table.to_string());
        }
    }
    Ok(())
}

async fn rebuild(
    tx: &mut Transaction<'_, Sqlite>,
    schema: &CollectionSchema,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    let table = schema.name;
    let staging = format!("{}__migrating", table);

    let live = inspect(tx, table).await?.ok_or_else(|| StorageError::Migration {
        table: table.to_string(),
        message: "table vanished during rebuild".to_string(),
    })?;

    execute(
        tx,
        &format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(table),
            quote_ident(&staging)
        ),
        report,
    )
    .await?;
    execute(tx, &schema.create_table_sql(table), report).await?;

    let mut targets = Vec::new();
    let mut sources = Vec::new();
    if live.column(ID_FIELD).is_some() {
        targets.push(quote_ident(ID_FIELD));
        sources.push(quote_ident(ID_FIELD));
    }
    for field in schema.fields() {
        if live.column(field.name).is_none() {
            continue;
        }
        targets.push(quote_ident(field.name));
        match (field.nullable, field.default) {
            (false, Some(default)) => {
                sources.push(format!("COALESCE({}, {})", quote_ident(field.name), default))
            }
            _ => sources.push(quote_ident(field.name)),
        }
    }

    if !targets.is_empty() {
        execute(
            tx,
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                quote_ident(table),
                targets.join(", "),
                sources.join(", "),
                quote_ident(&staging)
            ),
            report,
        )
        .await?;
    }

    execute(tx, &format!("DROP TABLE {}", quote_ident(&staging)), report).await?;
    Ok(())
}
