use crate::error::StorageError;
use crate::sink::storage::{StatsWriter, StorageRow, Value};
use fxhash::FxHashSet;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, params_from_iter};
use std::path::Path;
use std::sync::Mutex;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
        })
    }
}

struct Inner {
    conn: Connection,
    tables: FxHashSet<String>,
}

/// Upserts rows into SQLite. Tables are created from the first row written to
/// them, with the row's primary key as the table's primary key.
pub struct SqliteWriter {
    inner: Mutex<Inner>,
}

impl SqliteWriter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                tables: FxHashSet::default(),
            }),
        }
    }

    pub fn row_count(&self, table: &str) -> Result<u64, StorageError> {
        check_identifier(table, table)?;
        let inner = self.lock()?;
        let count: i64 = inner.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Reads one REAL column of the row identified by `primary_key`.
    pub fn read_real(
        &self,
        table: &str,
        column: &str,
        primary_key: &[(&str, Value)],
    ) -> Result<Option<f64>, StorageError> {
        check_identifier(table, table)?;
        check_identifier(table, column)?;
        for (name, _) in primary_key {
            check_identifier(table, name)?;
        }
        let predicate = primary_key
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("\"{}\" = ?{}", name, i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT \"{}\" FROM \"{}\" WHERE {}", column, table, predicate);

        let inner = self.lock()?;
        let mut stmt = inner.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(primary_key.iter().map(|(_, v)| v)))?;
        let value = match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        };
        Ok(value)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn check_identifier(table: &str, name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::Rejected {
            table: table.to_string(),
            reason: format!("invalid identifier '{}'", name),
        })
    }
}

fn column_type(value: &Value) -> &'static str {
    match value {
        Value::Text(_) => "TEXT",
        Value::Integer(_) => "INTEGER",
        Value::Real(_) => "REAL",
    }
}

impl StatsWriter for SqliteWriter {
    fn upsert(&self, row: &StorageRow) -> Result<(), StorageError> {
        check_identifier(&row.table, &row.table)?;
        if row.primary_key.is_empty() {
            return Err(StorageError::Rejected {
                table: row.table.clone(),
                reason: "empty primary key".into(),
            });
        }
        for (name, _) in row.all_columns() {
            check_identifier(&row.table, name)?;
        }

        let mut inner = self.lock()?;
        if !inner.tables.contains(&row.table) {
            let definitions = row
                .all_columns()
                .map(|(name, value)| format!("\"{}\" {}", name, column_type(value)))
                .collect::<Vec<_>>()
                .join(", ");
            let keys = row
                .primary_key
                .iter()
                .map(|(name, _)| format!("\"{}\"", name))
                .collect::<Vec<_>>()
                .join(", ");
            inner.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" ({}, PRIMARY KEY ({}))",
                    row.table, definitions, keys
                ),
                [],
            )?;
            inner.tables.insert(row.table.clone());
        }

        let names = row
            .all_columns()
            .map(|(name, _)| format!("\"{}\"", name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=row.primary_key.len() + row.columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO \"{}\" ({}) VALUES ({})",
            row.table, names, placeholders
        );
        let mut stmt = inner.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(row.all_columns().map(|(_, v)| v)))?;
        Ok(())
    }
}
