/*!
# datascope - schema-agnostic exploration of uploaded databases

datascope takes a relational database file it knows nothing about, discovers
its tables and columns, runs ad-hoc statements against it and profiles the
columns of any table.

## Example

```rust,ignore
use datascope::reader::{Reader, SqliteReader};
use datascope::{execute, insights};

let reader = SqliteReader::new("shop.db");
let schema = reader.introspect()?;
let page = execute::execute_table(&reader, "orders", 1, 20)?;
let profile = insights::profile(&reader, "orders")?;
```

## Core Components

- [`session`] - session id to database file registry with expiry
- [`schema`] - introspected tables, columns and foreign keys
- [`normalize`] - engine values to transport-safe JSON scalars
- [`execute`] - statement classification, execution and pagination
- [`insights`] - per-column descriptive statistics
- [`reader`] - data source abstraction (SQLite)
- [`assist`] - prompt rendering and SQL extraction for text-to-SQL models
- `api` - session-scoped entry points used by the HTTP server
*/

pub mod assist;
pub mod execute;
pub mod insights;
pub mod normalize;
pub mod reader;
pub mod schema;
pub mod session;

#[cfg(feature = "sqlite")]
pub mod api;

pub use execute::{QueryOutcome, StatementKind, TableData};
pub use insights::{ColumnProfile, TableInsights};
pub use normalize::{normalize, Datum};
pub use schema::{ColumnDescriptor, Schema};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main library error type
#[derive(thiserror::Error, Debug)]
pub enum DatascopeError {
    #[error("Session not found or expired: {0}. Please re-upload the database.")]
    SessionNotFound(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Failed to read database schema: {0}")]
    SchemaParseError(String),

    #[error("Query Error: {0}")]
    QueryError(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("SQL assistant is not configured: {0}")]
    AssistUnavailable(String),

    #[error("SQL assistant failed: {0}")]
    AssistError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, DatascopeError>;

impl From<std::io::Error> for DatascopeError {
    fn from(err: std::io::Error) -> Self {
        DatascopeError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for DatascopeError {
    fn from(err: serde_json::Error) -> Self {
        DatascopeError::InternalError(format!("JSON serialization failed: {}", err))
    }
}
