//! SQLite-backed log store.
//!
//! One writer connection takes appends inside IMMEDIATE transactions; clause
//! execution goes through a separate read-only connection so reads are not
//! queued behind audit writes (WAL mode).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use thiserror::Error;
use warden_policy::ValidatedClause;
use warden_schema::TableSchema;

mod audit;
pub use audit::LogEvent;

pub const DEFAULT_ROW_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("invalid table descriptor: {0}")]
    Schema(String),
    #[error("refusing to run a statement that may write")]
    NotReadOnly,
    #[error("connection lock poisoned")]
    Lock,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

/// One result row in column order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResultRow {
    columns: Vec<(String, Value)>,
}

impl QueryResultRow {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for QueryResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (k, v) in &self.columns {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Storage side of clause execution: one read query per call, never a write.
pub trait ClauseStore: Send + Sync {
    fn execute(&self, clause: &ValidatedClause) -> Result<Vec<QueryResultRow>, StoreError>;
}

pub struct LogStore {
    writer: Mutex<Connection>,
    /// `None` for in-memory stores, which cannot share a database across
    /// connections; reads then use the writer.
    reader: Option<Mutex<Connection>>,
    table: TableSchema,
    row_limit: usize,
}

impl LogStore {
    pub fn open(path: impl AsRef<Path>, table: TableSchema, row_limit: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        table.check().map_err(|e| StoreError::Schema(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Sqlite(e.to_string()))?;
        }

        let writer = Connection::open(path)?;
        writer.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        writer.execute_batch(&create_table_sql(&table))?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA query_only = ON;")?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            table,
            row_limit,
        })
    }

    pub fn open_in_memory(table: TableSchema, row_limit: usize) -> Result<Self, StoreError> {
        table.check().map_err(|e| StoreError::Schema(e.to_string()))?;
        let writer = Connection::open_in_memory()?;
        writer.execute_batch(&create_table_sql(&table))?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
            table,
            row_limit,
        })
    }

    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    pub fn row_limit(&self) -> usize {
        self.row_limit
    }

    pub(crate) fn with_writer<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.writer.lock().map_err(|_| StoreError::Lock)?;
        f(&mut guard)
    }

    fn with_reader<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let lock = self.reader.as_ref().unwrap_or(&self.writer);
        let guard = lock.lock().map_err(|_| StoreError::Lock)?;
        f(&guard)
    }

    fn select_sql(&self, clause: &ValidatedClause) -> String {
        format!(
            "SELECT * FROM {} WHERE ({}) ORDER BY {} DESC LIMIT ?1",
            self.table.name,
            clause.as_str(),
            self.table.recency_field
        )
    }
}

impl ClauseStore for LogStore {
    fn execute(&self, clause: &ValidatedClause) -> Result<Vec<QueryResultRow>, StoreError> {
        let sql = self.select_sql(clause);
        let limit = self.row_limit as i64;
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            if !stmt.readonly() {
                return Err(StoreError::NotReadOnly);
            }
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query([limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    columns.push((name.clone(), to_json(row.get_ref(i)?)));
                }
                out.push(QueryResultRow { columns });
            }
            tracing::debug!(event = "store.executed", rows = out.len());
            Ok(out)
        })
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(hex::encode(b)),
    }
}

fn create_table_sql(table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .fields
        .iter()
        .map(|f| {
            if f.name.eq_ignore_ascii_case("id") {
                format!("{} {} PRIMARY KEY", f.name, f.kind.sql_type())
            } else {
                format!("{} {}", f.name, f.kind.sql_type())
            }
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {name} ({cols});
         CREATE INDEX IF NOT EXISTS idx_{name}_{recency} ON {name} ({recency});",
        name = table.name,
        cols = columns.join(", "),
        recency = table.recency_field,
    )
}
