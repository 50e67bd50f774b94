//! Per-collection schema registry.
//!
//! Each collection declares its ordered fields once. The registry drives table
//! creation, migration, row encoding and the pull transform.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StorageError, StorageResult};

/// Name of the primary key column every collection carries.
pub const ID_FIELD: &str = "id";
/// Bookkeeping column on sync-tracked collections.
pub const SYNCED_FIELD: &str = "synced";
/// Bookkeeping column on sync-tracked collections.
pub const LAST_SYNCED_AT_FIELD: &str = "last_synced_at";

/// Storage kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    /// Stored as 0/1, read back as `bool`.
    Boolean,
    /// RFC 3339 text.
    Timestamp,
    /// Composite value, stored as serialized JSON text.
    Json,
}

impl FieldKind {
    /// SQLite column type used in DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Timestamp | FieldKind::Json => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Real => "REAL",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => write!(f, "text"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Real => write!(f, "real"),
            FieldKind::Boolean => write!(f, "boolean"),
            FieldKind::Timestamp => write!(f, "timestamp"),
            FieldKind::Json => write!(f, "json"),
        }
    }
}

/// A single column of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
    /// SQL literal used as column default.
    pub default: Option<&'static str>,
    /// Never sent to the remote on push.
    pub local_only: bool,
    /// The remote exchanges this composite as JSON text.
    pub remote_encoded: bool,
}

impl FieldDef {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            unique: false,
            default: None,
            local_only: false,
            remote_encoded: false,
        }
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn real(name: &'static str) -> Self {
        Self::new(name, FieldKind::Real)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn timestamp(name: &'static str) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn json(name: &'static str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub fn remote_encoded(mut self) -> Self {
        self.remote_encoded = true;
        self
    }

    /// Column definition as it appears in `CREATE TABLE` / `ADD COLUMN`.
    pub fn column_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(self.name), self.kind.sql_type());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Schema of one collection. The `id` primary key is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub name: &'static str,
    fields: Vec<FieldDef>,
    pub sync_tracked: bool,
}

impl CollectionSchema {
    /// Creates a schema that is not tracked for sync.
    pub fn local(name: &'static str, fields: Vec<FieldDef>) -> Self {
        Self {
            name,
            fields,
            sync_tracked: false,
        }
    }

    /// Creates a sync-tracked schema; `synced` and `last_synced_at` are appended.
    pub fn tracked(name: &'static str, mut fields: Vec<FieldDef>) -> Self {
        fields.push(
            FieldDef::boolean(SYNCED_FIELD)
                .required()
                .with_default("0")
                .local_only(),
        );
        fields.push(FieldDef::timestamp(LAST_SYNCED_AT_FIELD).local_only());
        Self {
            name,
            fields,
            sync_tracked: true,
        }
    }

    /// Fields in declaration order, excluding `id`.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All column names in table order, `id` first.
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once(ID_FIELD)
            .chain(self.fields.iter().map(|f| f.name))
            .collect()
    }

    /// `CREATE TABLE` statement for this schema under the given table name.
    pub fn create_table_sql(&self, table: &str) -> String {
        let mut columns = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(ID_FIELD))];
        columns.extend(self.fields.iter().map(FieldDef::column_sql));
        format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
    }
}

/// A typed record stored in a registered collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Collection (table) name.
    const COLLECTION: &'static str;

    /// Schema of the collection.
    fn schema() -> CollectionSchema;

    /// Immutable record id.
    fn id(&self) -> String;
}

/// Registry of all collections known to the engine.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    collections: BTreeMap<&'static str, Arc<CollectionSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema, replacing any previous one with the same name.
    pub fn with(mut self, schema: CollectionSchema) -> Self {
        self.collections.insert(schema.name, Arc::new(schema));
        self
    }

    /// Adds the schema of a typed record.
    pub fn register<R: Record>(self) -> Self {
        self.with(R::schema())
    }

    pub fn get(&self, name: &str) -> StorageResult<Arc<CollectionSchema>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownCollection(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<CollectionSchema>> {
        self.collections.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collections.keys().copied().collect()
    }
}

/// Quotes an identifier for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
