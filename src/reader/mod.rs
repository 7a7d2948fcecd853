//! Data source abstraction layer for datascope
//!
//! The reader module provides a pluggable interface for introspecting and
//! querying a database resource and returning engine-neutral [`Datum`] cells.
//!
//! # Architecture
//!
//! All readers implement the `Reader` trait, which provides:
//! - Schema introspection (tables, columns, foreign keys)
//! - Read statements → materialized [`Rows`]
//! - Write statements inside a transaction → affected row count
//! - Table counts, page slices and full-table [`Frame`]s for profiling
//! - Query plans
//!
//! A reader never holds a connection between calls: each method opens one,
//! does its work and releases it before returning.
//!
//! # Example
//!
//! ```rust,ignore
//! use datascope::reader::{Reader, SqliteReader};
//!
//! let reader = SqliteReader::new("/tmp/uploads/shop.db");
//! let schema = reader.introspect()?;
//! let rows = reader.query("SELECT * FROM orders WHERE total > 100")?;
//! ```

use crate::normalize::Datum;
use crate::schema::Schema;
use crate::Result;
use serde::Serialize;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteReader;

/// Materialized result of a read statement, row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Datum>>,
}

/// One column of a fully materialized table.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub declared_type: String,
    pub values: Vec<Datum>,
}

/// A whole table, column-major, as needed by the profiler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub table_name: String,
    pub columns: Vec<FrameColumn>,
    pub row_count: usize,
}

/// One row of an `EXPLAIN QUERY PLAN` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub id: i64,
    pub parent: i64,
    pub notused: i64,
    pub detail: String,
}

/// Trait for data source readers
///
/// Readers own the engine-specific pieces (connections, catalogs, quoting,
/// error classification) and expose them through engine-neutral types.
/// Statement classification, pagination, normalization and profiling live
/// above this seam and work with any reader.
pub trait Reader {
    /// Enumerate user tables and their columns.
    ///
    /// # Errors
    ///
    /// Returns `DatascopeError::SchemaParseError` if the catalog cannot be read,
    /// including when the resource is not a database at all.
    fn introspect(&self) -> Result<Schema>;

    /// Execute a read statement and materialize every row.
    fn query(&self, sql: &str) -> Result<Rows>;

    /// Execute a write statement in its own transaction.
    ///
    /// Returns the engine-reported number of affected rows; rows produced by
    /// a `RETURNING` clause are discarded. On error the transaction is
    /// rolled back before the error is returned. Transaction control and
    /// `VACUUM` run in autocommit mode.
    fn execute(&self, sql: &str) -> Result<usize>;

    /// `SELECT COUNT(*)` for a table the caller has already validated.
    fn count_rows(&self, table: &str) -> Result<u64>;

    /// Fetch `limit` rows of a validated table starting at `offset`.
    fn fetch_page(&self, table: &str, limit: u64, offset: u64) -> Result<Rows>;

    /// Materialize a validated table in full.
    fn materialize(&self, table: &str) -> Result<Frame>;

    /// Describe how the engine would run a statement, without running it.
    fn explain(&self, sql: &str) -> Result<Vec<PlanStep>>;
}
