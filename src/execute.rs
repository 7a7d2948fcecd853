//! Statement classification, execution and result shaping
//!
//! A statement is a *read* when, trimmed and case-folded, it starts with one
//! of [`READ_KEYWORDS`]; every other non-empty statement is a *write*. Reads
//! are materialized in full and returned as a single page. Writes run inside
//! their own transaction and report the affected row count as a one-row
//! message table. Table browsing (`execute_table`) is the only paginated path.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::normalize::normalize;
use crate::reader::{PlanStep, Reader, Rows};
use crate::{DatascopeError, Result};

/// Leading keywords that mark a statement as producing rows.
pub const READ_KEYWORDS: &[&str] = &["select", "with", "pragma"];

/// Largest page a table browse may request.
pub const MAX_PAGE_SIZE: u64 = 100;

/// Label used for free-form query results.
pub const QUERY_RESULT_LABEL: &str = "Query Result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// Classify a statement by its leading keyword.
    ///
    /// Returns `None` for an empty (or whitespace-only) statement.
    pub fn classify(sql: &str) -> Option<Self> {
        if sql.trim().is_empty() {
            return None;
        }
        if READ_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
            Some(StatementKind::Read)
        } else {
            Some(StatementKind::Write)
        }
    }
}

/// First word of a statement, lowercased.
pub fn leading_keyword(sql: &str) -> String {
    sql.trim()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub total_rows: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u64, page_size: u64, total_rows: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_rows.div_ceil(page_size)
        };
        Self {
            page,
            page_size,
            total_rows,
            total_pages,
        }
    }

    /// One page holding the whole result.
    pub fn single_page(total_rows: u64) -> Self {
        Self::new(1, total_rows, total_rows)
    }
}

/// A normalized, transport-safe result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableData {
    pub table_name: String,
    pub columns: Vec<String>,
    pub data: Vec<Map<String, Value>>,
    pub pagination: Pagination,
}

impl TableData {
    /// Normalize every cell of `rows` into row objects keyed by column name.
    pub fn from_rows(table_name: impl Into<String>, rows: Rows, pagination: Pagination) -> Self {
        let data = rows
            .rows
            .iter()
            .map(|row| {
                rows.columns
                    .iter()
                    .zip(row)
                    .map(|(name, datum)| (name.clone(), normalize(datum)))
                    .collect::<Map<String, Value>>()
            })
            .collect();

        Self {
            table_name: table_name.into(),
            columns: rows.columns,
            data,
            pagination,
        }
    }

    /// One-row, one-column table carrying a message.
    pub fn message(text: impl Into<String>) -> Self {
        let mut row = Map::new();
        row.insert("message".to_string(), Value::String(text.into()));
        Self {
            table_name: QUERY_RESULT_LABEL.to_string(),
            columns: vec!["message".to_string()],
            data: vec![row],
            pagination: Pagination::single_page(1),
        }
    }
}

/// Result of running a free-form statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Rows produced by a read statement.
    Rows(TableData),
    /// A committed write and its message table.
    Write {
        rows_affected: usize,
        result: TableData,
    },
}

impl QueryOutcome {
    pub fn kind(&self) -> StatementKind {
        match self {
            QueryOutcome::Rows(_) => StatementKind::Read,
            QueryOutcome::Write { .. } => StatementKind::Write,
        }
    }

    pub fn table_data(&self) -> &TableData {
        match self {
            QueryOutcome::Rows(data) => data,
            QueryOutcome::Write { result, .. } => result,
        }
    }
}

impl Serialize for QueryOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.table_data().serialize(serializer)
    }
}

fn non_empty(sql: &str) -> Result<(&str, StatementKind)> {
    match StatementKind::classify(sql) {
        Some(kind) => Ok((sql.trim(), kind)),
        None => Err(DatascopeError::QueryError(
            "Query cannot be empty".to_string(),
        )),
    }
}

/// Run an arbitrary statement against a reader.
pub fn execute<R: Reader + ?Sized>(reader: &R, sql: &str) -> Result<QueryOutcome> {
    let (sql, kind) = non_empty(sql)?;

    match kind {
        StatementKind::Read => {
            let rows = reader.query(sql)?;
            let pagination = Pagination::single_page(rows.rows.len() as u64);
            Ok(QueryOutcome::Rows(TableData::from_rows(
                QUERY_RESULT_LABEL,
                rows,
                pagination,
            )))
        }
        StatementKind::Write => {
            let rows_affected = reader.execute(sql)?;
            info!("Write statement affected {} rows", rows_affected);
            Ok(QueryOutcome::Write {
                rows_affected,
                result: TableData::message(format!(
                    "Query executed successfully. {} rows affected.",
                    rows_affected
                )),
            })
        }
    }
}

/// Check that `table` is one of the reader's introspected tables.
///
/// Table names are interpolated into generated SQL, so only names the
/// catalog itself reports are accepted. Returns the catalog's spelling.
pub fn ensure_table<R: Reader + ?Sized>(reader: &R, table: &str) -> Result<String> {
    let schema = reader.introspect()?;
    schema
        .table(table)
        .map(|t| t.name.clone())
        .ok_or_else(|| DatascopeError::TableNotFound(table.to_string()))
}

/// Fetch one page of a table.
///
/// `page` is 1-based. The total row count comes from `COUNT(*)`, so
/// `total_pages` reflects the whole table rather than the fetched slice.
pub fn execute_table<R: Reader + ?Sized>(
    reader: &R,
    table: &str,
    page: u64,
    page_size: u64,
) -> Result<TableData> {
    if page < 1 {
        return Err(DatascopeError::QueryError(
            "page must be at least 1".to_string(),
        ));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(DatascopeError::QueryError(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let table = ensure_table(reader, table)?;

    let total_rows = reader.count_rows(&table)?;
    let offset = (page - 1).saturating_mul(page_size);
    let rows = reader.fetch_page(&table, page_size, offset)?;

    Ok(TableData::from_rows(
        table,
        rows,
        Pagination::new(page, page_size, total_rows),
    ))
}

/// Query plan for a statement. The statement itself is not run.
pub fn explain<R: Reader + ?Sized>(reader: &R, sql: &str) -> Result<Vec<PlanStep>> {
    let (sql, _) = non_empty(sql)?;
    reader.explain(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Datum;
    use serde_json::json;

    #[test]
    fn test_classify_read_keywords() {
        assert_eq!(StatementKind::classify("SELECT 1"), Some(StatementKind::Read));
        assert_eq!(
            StatementKind::classify("  \n with x as (select 1) select * from x"),
            Some(StatementKind::Read)
        );
        assert_eq!(
            StatementKind::classify("PRAGMA table_info(users)"),
            Some(StatementKind::Read)
        );
        assert_eq!(StatementKind::classify("Select\t*"), Some(StatementKind::Read));
    }

    #[test]
    fn test_classify_write_and_empty() {
        assert_eq!(
            StatementKind::classify("DELETE FROM users"),
            Some(StatementKind::Write)
        );
        assert_eq!(
            StatementKind::classify("SELEKT * FROM x"),
            Some(StatementKind::Write)
        );
        // Keyword must be a whole word
        assert_eq!(
            StatementKind::classify("selection_table"),
            Some(StatementKind::Write)
        );
        assert_eq!(StatementKind::classify("   "), None);
    }

    #[test]
    fn test_pagination_math() {
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 20, 20).total_pages, 1);
        assert_eq!(Pagination::new(1, 20, 21).total_pages, 2);
        assert_eq!(Pagination::single_page(0).total_pages, 0);
        assert_eq!(Pagination::single_page(7).total_pages, 1);
    }

    #[test]
    fn test_from_rows_normalizes() {
        let rows = Rows {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![Datum::Real(f64::NAN), Datum::Text("x".to_string())]],
        };
        let data = TableData::from_rows("t", rows, Pagination::single_page(1));
        assert_eq!(data.data[0]["a"], Value::Null);
        assert_eq!(data.data[0]["b"], json!("x"));
    }

    #[test]
    fn test_message_table_shape() {
        let data = TableData::message("done");
        assert_eq!(data.columns, vec!["message"]);
        assert_eq!(data.data.len(), 1);
        assert_eq!(data.pagination.total_rows, 1);
    }

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use super::super::*;
        use crate::reader::SqliteReader;
        use proptest::prelude::*;
        use rusqlite::Connection;
        use serde_json::json;
        use tempfile::TempDir;

        fn users_db(dir: &TempDir) -> SqliteReader {
            let path = dir.path().join("users.db");
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
                 INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', NULL), (3, 'Carol', 41);",
            )
            .unwrap();
            SqliteReader::new(path)
        }

        #[test]
        fn test_read_returns_single_page() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let outcome = execute(&reader, "SELECT * FROM users ORDER BY id").unwrap();
            assert_eq!(outcome.kind(), StatementKind::Read);
            let data = outcome.table_data();
            assert_eq!(data.table_name, "Query Result");
            assert_eq!(data.columns, vec!["id", "name", "age"]);
            assert_eq!(data.data.len(), 3);
            assert_eq!(data.data[1]["age"], Value::Null);
            assert_eq!(data.pagination, Pagination::new(1, 3, 3));
        }

        #[test]
        fn test_read_empty_result() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let outcome = execute(&reader, "SELECT * FROM users WHERE 1 = 0").unwrap();
            let data = outcome.table_data();
            assert!(data.data.is_empty());
            assert_eq!(data.pagination.total_rows, 0);
            assert_eq!(data.pagination.total_pages, 0);
        }

        #[test]
        fn test_delete_then_browse() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let outcome = execute(&reader, "DELETE FROM users WHERE id=1").unwrap();
            match &outcome {
                QueryOutcome::Write { rows_affected, result } => {
                    assert_eq!(*rows_affected, 1);
                    assert_eq!(
                        result.data[0]["message"],
                        json!("Query executed successfully. 1 rows affected.")
                    );
                }
                other => panic!("expected write outcome, got {:?}", other),
            }

            let page = execute_table(&reader, "users", 1, 20).unwrap();
            assert_eq!(page.data.len(), 2);
            assert_eq!(page.pagination.total_rows, 2);
        }

        #[test]
        fn test_malformed_sql_leaves_state_unchanged() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let err = execute(&reader, "SELEKT * FROM x").unwrap_err();
            assert!(matches!(err, DatascopeError::QueryError(_)));
            assert!(err.to_string().contains("syntax error"));

            let page = execute_table(&reader, "users", 1, 20).unwrap();
            assert_eq!(page.pagination.total_rows, 3);
        }

        #[test]
        fn test_empty_query_rejected() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let err = execute(&reader, "  ").unwrap_err();
            assert!(matches!(err, DatascopeError::QueryError(_)));
        }

        #[test]
        fn test_execute_table_validates_name() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let err = execute_table(&reader, "users; DROP TABLE users", 1, 20).unwrap_err();
            assert!(matches!(err, DatascopeError::TableNotFound(_)));
            assert_eq!(reader.count_rows("users").unwrap(), 3);
        }

        #[test]
        fn test_execute_table_uses_catalog_spelling() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let page = execute_table(&reader, "USERS", 1, 20).unwrap();
            assert_eq!(page.table_name, "users");
            assert_eq!(page.data.len(), 3);
        }

        #[test]
        fn test_write_with_returning_clause() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let outcome = execute(
                &reader,
                "INSERT INTO users (name, age) VALUES ('Dan', 5) RETURNING id",
            )
            .unwrap();
            assert_eq!(outcome.kind(), StatementKind::Write);
            assert!(matches!(outcome, QueryOutcome::Write { rows_affected: 1, .. }));

            let page = execute_table(&reader, "users", 1, 20).unwrap();
            assert_eq!(page.pagination.total_rows, 4);
        }

        #[test]
        fn test_execute_table_bounds() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            assert!(execute_table(&reader, "users", 0, 20).is_err());
            assert!(execute_table(&reader, "users", 1, 0).is_err());
            assert!(execute_table(&reader, "users", 1, 101).is_err());
            assert!(execute_table(&reader, "users", 1, 100).is_ok());
        }

        #[test]
        fn test_page_past_end_is_empty() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let page = execute_table(&reader, "users", 5, 2).unwrap();
            assert!(page.data.is_empty());
            assert_eq!(page.pagination.total_pages, 2);
        }

        #[test]
        fn test_explain_does_not_run_statement() {
            let dir = TempDir::new().unwrap();
            let reader = users_db(&dir);

            let plan = explain(&reader, "DELETE FROM users WHERE age > 1").unwrap();
            assert!(!plan.is_empty());
            assert_eq!(reader.count_rows("users").unwrap(), 3);
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn prop_pages_reassemble_table(n in 0usize..60, page_size in 1u64..15) {
                let dir = TempDir::new().unwrap();
                let path = dir.path().join("numbers.db");
                let conn = Connection::open(&path).unwrap();
                conn.execute_batch("CREATE TABLE numbers (v INTEGER)").unwrap();
                for i in 0..n {
                    conn.execute("INSERT INTO numbers VALUES (?1)", [i as i64]).unwrap();
                }
                drop(conn);
                let reader = SqliteReader::new(path);

                let first = execute_table(&reader, "numbers", 1, page_size).unwrap();
                let total_pages = first.pagination.total_pages;
                prop_assert_eq!(total_pages, (n as u64).div_ceil(page_size));

                let mut seen = Vec::new();
                for page in 1..=total_pages {
                    let data = execute_table(&reader, "numbers", page, page_size).unwrap();
                    if page < total_pages {
                        prop_assert_eq!(data.data.len() as u64, page_size);
                    }
                    for row in data.data {
                        seen.push(row["v"].as_i64().unwrap());
                    }
                }
                let expected: Vec<i64> = (0..n as i64).collect();
                prop_assert_eq!(seen, expected);
            }
        }
    }
}
