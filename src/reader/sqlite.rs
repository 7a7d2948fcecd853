//! SQLite reader
//!
//! Works against a database file on disk. Every call opens a fresh
//! connection with `READ_WRITE` (never `CREATE`, so a vanished upload is an
//! error rather than a new empty database) and drops it before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode, OpenFlags, Params};
use tracing::{debug, warn};

use super::{Frame, FrameColumn, PlanStep, Reader, Rows};
use crate::execute::leading_keyword;
use crate::normalize::Datum;
use crate::schema::{quote_identifier, ColumnDescriptor, ForeignKey, Schema, TableSchema};
use crate::{DatascopeError, Result};

// Statements that cannot run inside the per-write transaction.
const AUTOCOMMIT_KEYWORDS: &[&str] = &["begin", "commit", "end", "rollback", "vacuum"];

const TABLES_SQL: &str = "SELECT name FROM sqlite_master WHERE type = 'table'";
const COLUMNS_SQL: &str =
    "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid";
const FOREIGN_KEYS_SQL: &str =
    "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq";

/// Reader over a single SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteReader {
    path: PathBuf,
}

impl SqliteReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnDescriptor>> {
        let mut stmt = conn.prepare(COLUMNS_SQL)?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnDescriptor {
                    name: row.get(0)?,
                    declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    notnull: row.get::<_, i64>(2)? != 0,
                    pk: row.get::<_, i64>(3)? > 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn table_foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ForeignKey>> {
        let mut stmt = conn.prepare(FOREIGN_KEYS_SQL)?;
        let keys = stmt
            .query_map([table], |row| {
                Ok(ForeignKey {
                    column: row.get(0)?,
                    references_table: row.get(1)?,
                    references_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn introspect_with(conn: &Connection) -> rusqlite::Result<Schema> {
        let mut stmt = conn.prepare(TABLES_SQL)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut schema = Schema::new();
        for name in names {
            let mut table = TableSchema::new(name.clone(), Self::table_columns(conn, &name)?);
            table.foreign_keys = Self::table_foreign_keys(conn, &name)?;
            schema.push(table);
        }
        Ok(schema)
    }
}

/// Run a statement and collect every row as datums.
fn collect_rows<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Rows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let width = columns.len();

    let mut out = Vec::new();
    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(Datum::from(row.get_ref(idx)?));
        }
        out.push(values);
    }

    Ok(Rows { columns, rows: out })
}

/// Step a statement to completion, discarding any rows it returns
/// (`... RETURNING`), and report the rows it changed.
fn run_to_completion(conn: &Connection, sql: &str) -> rusqlite::Result<usize> {
    {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }
    Ok(usize::try_from(conn.changes()).unwrap_or(usize::MAX))
}

/// Classify an engine error as a caller mistake or an internal failure.
fn classify(err: rusqlite::Error) -> DatascopeError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::CannotOpen
            | ErrorCode::OutOfMemory
            | ErrorCode::DiskFull
            | ErrorCode::InternalMalfunction
            | ErrorCode::PermissionDenied => DatascopeError::InternalError(err.to_string()),
            _ => DatascopeError::QueryError(err.to_string()),
        },
        rusqlite::Error::InvalidPath(_)
        | rusqlite::Error::Utf8Error(_)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..) => {
            DatascopeError::InternalError(err.to_string())
        }
        _ => DatascopeError::QueryError(err.to_string()),
    }
}

impl Reader for SqliteReader {
    fn introspect(&self) -> Result<Schema> {
        debug!("Introspecting {}", self.path.display());
        let conn = self
            .connect()
            .map_err(|e| DatascopeError::SchemaParseError(e.to_string()))?;
        Self::introspect_with(&conn).map_err(|e| DatascopeError::SchemaParseError(e.to_string()))
    }

    fn query(&self, sql: &str) -> Result<Rows> {
        let conn = self.connect().map_err(classify)?;
        let rows = collect_rows(&conn, sql, []).map_err(classify)?;
        debug!("Read statement returned {} rows", rows.rows.len());
        Ok(rows)
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        let mut conn = self.connect().map_err(classify)?;

        if AUTOCOMMIT_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
            let changed = run_to_completion(&conn, sql).map_err(classify)?;
            debug!("Statement run in autocommit mode");
            return Ok(changed);
        }

        let tx = conn.transaction().map_err(classify)?;

        match run_to_completion(&tx, sql) {
            Ok(changed) => {
                tx.commit().map_err(classify)?;
                debug!("Write statement committed, {} rows affected", changed);
                Ok(changed)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback failed after write error: {}", rollback_err);
                }
                Err(classify(err))
            }
        }
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        let conn = self.connect().map_err(classify)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<Rows> {
        let conn = self.connect().map_err(classify)?;
        let sql = format!(
            "SELECT * FROM {} LIMIT ?1 OFFSET ?2",
            quote_identifier(table)
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        collect_rows(&conn, &sql, params![limit, offset]).map_err(classify)
    }

    fn materialize(&self, table: &str) -> Result<Frame> {
        let conn = self.connect().map_err(classify)?;

        let declared: HashMap<String, String> = Self::table_columns(&conn, table)
            .map_err(classify)?
            .into_iter()
            .map(|col| (col.name, col.declared_type))
            .collect();

        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let rows = collect_rows(&conn, &sql, []).map_err(classify)?;
        let row_count = rows.rows.len();

        let mut columns: Vec<FrameColumn> = rows
            .columns
            .iter()
            .map(|name| FrameColumn {
                name: name.clone(),
                declared_type: declared.get(name).cloned().unwrap_or_default(),
                values: Vec::with_capacity(row_count),
            })
            .collect();

        for row in rows.rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        debug!(
            "Materialized '{}': {} rows x {} columns",
            table,
            row_count,
            columns.len()
        );

        Ok(Frame {
            table_name: table.to_string(),
            columns,
            row_count,
        })
    }

    fn explain(&self, sql: &str) -> Result<Vec<PlanStep>> {
        let conn = self.connect().map_err(classify)?;
        let mut stmt = conn
            .prepare(&format!("EXPLAIN QUERY PLAN {}", sql))
            .map_err(classify)?;
        let steps = stmt
            .query_map([], |row| {
                Ok(PlanStep {
                    id: row.get(0)?,
                    parent: row.get(1)?,
                    notused: row.get(2)?,
                    detail: row.get(3)?,
                })
            })
            .map_err(classify)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(classify)?;
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id INTEGER REFERENCES users(id),
                 total REAL
             );
             INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', NULL), (3, 'Carol', 41);
             INSERT INTO orders (user_id, total) VALUES (1, 9.5), (3, 20.0);",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_introspect_order_and_internal_tables() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let schema = reader.introspect().unwrap();
        // AUTOINCREMENT creates sqlite_sequence, which must be hidden
        assert_eq!(schema.table_names(), vec!["users", "orders"]);

        let users = schema.table("users").unwrap();
        let names: Vec<&str> = users.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "age"]);
        assert!(users.columns[0].pk);
        assert!(users.columns[1].notnull);
        assert_eq!(users.columns[2].declared_type, "INTEGER");
    }

    #[test]
    fn test_introspect_is_stable() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));
        assert_eq!(reader.introspect().unwrap(), reader.introspect().unwrap());
    }

    #[test]
    fn test_introspect_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let schema = reader.introspect().unwrap();
        let orders = schema.table("orders").unwrap();
        assert_eq!(
            orders.foreign_keys,
            vec![ForeignKey {
                column: "user_id".to_string(),
                references_table: "users".to_string(),
                references_column: "id".to_string(),
            }]
        );
    }

    #[test]
    fn test_introspect_not_a_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.db");
        std::fs::write(&path, b"this is definitely not a sqlite file, just some text").unwrap();

        let err = SqliteReader::new(path).introspect().unwrap_err();
        assert!(matches!(err, DatascopeError::SchemaParseError(_)));
    }

    #[test]
    fn test_query_materializes_datums() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let rows = reader
            .query("SELECT id, name, age FROM users ORDER BY id")
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "age"]);
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[1][1], Datum::Text("Bob".to_string()));
        assert_eq!(rows.rows[1][2], Datum::Null);
    }

    #[test]
    fn test_execute_commits() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let changed = reader.execute("UPDATE users SET age = 1").unwrap();
        assert_eq!(changed, 3);
        let rows = reader.query("SELECT SUM(age) FROM users").unwrap();
        assert_eq!(rows.rows[0][0], Datum::Integer(3));
    }

    #[test]
    fn test_execute_constraint_violation_rolls_back() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let err = reader
            .execute("INSERT INTO users (id, name) VALUES (1, 'Duplicate')")
            .unwrap_err();
        assert!(matches!(err, DatascopeError::QueryError(_)));
        assert_eq!(reader.count_rows("users").unwrap(), 3);
    }

    #[test]
    fn test_execute_returning_commits() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let changed = reader
            .execute("INSERT INTO users (name, age) VALUES ('Dan', 5) RETURNING id")
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(reader.count_rows("users").unwrap(), 4);

        let changed = reader
            .execute("DELETE FROM users WHERE id = 1 RETURNING *")
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(reader.count_rows("users").unwrap(), 3);
    }

    #[test]
    fn test_vacuum_runs_outside_transaction() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        assert!(reader.execute("VACUUM").is_ok());
        assert_eq!(reader.count_rows("users").unwrap(), 3);
    }

    #[test]
    fn test_stray_commit_is_query_error() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let err = reader.execute("COMMIT").unwrap_err();
        assert!(matches!(err, DatascopeError::QueryError(_)));
        assert!(reader.execute("DELETE FROM users WHERE id = 3").is_ok());
        assert_eq!(reader.count_rows("users").unwrap(), 2);
    }

    #[test]
    fn test_failed_returning_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let err = reader
            .execute("INSERT INTO users (id, name) VALUES (2, 'Again') RETURNING id")
            .unwrap_err();
        assert!(matches!(err, DatascopeError::QueryError(_)));
        assert_eq!(reader.count_rows("users").unwrap(), 3);
    }

    #[test]
    fn test_fetch_page() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let page = reader.fetch_page("users", 2, 2).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0][1], Datum::Text("Carol".to_string()));
    }

    #[test]
    fn test_materialize_is_column_major() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let frame = reader.materialize("orders").unwrap();
        assert_eq!(frame.row_count, 2);
        assert_eq!(frame.columns.len(), 3);
        assert_eq!(frame.columns[2].name, "total");
        assert_eq!(frame.columns[2].declared_type, "REAL");
        assert_eq!(
            frame.columns[2].values,
            vec![Datum::Real(9.5), Datum::Real(20.0)]
        );
    }

    #[test]
    fn test_explain() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(create_test_db(&dir));

        let plan = reader.explain("SELECT * FROM users WHERE id = 1").unwrap();
        assert!(!plan.is_empty());
        assert!(plan[0].detail.contains("users"));
    }

    #[test]
    fn test_missing_file_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let reader = SqliteReader::new(dir.path().join("gone.db"));

        let err = reader.query("SELECT 1").unwrap_err();
        assert!(matches!(err, DatascopeError::InternalError(_)));
    }
}
