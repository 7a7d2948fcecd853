//! Session-scoped entry points
//!
//! [`Datascope`] owns the upload directory and a [`SessionStore`], and turns
//! `(session_id, ...)` requests into calls on a [`SqliteReader`] for the
//! session's database file. The HTTP server is a thin layer over this type.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assist::{self, SqlGenerator};
use crate::execute::{self, QueryOutcome, TableData};
use crate::insights::{self, TableInsights};
use crate::reader::{PlanStep, Reader, SqliteReader};
use crate::schema::Schema;
use crate::session::{is_within, Session, SessionInfo, SessionManager, SessionStore};
use crate::{DatascopeError, Result};

/// File extensions accepted for upload
pub const ALLOWED_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

/// Result of a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub session_id: String,
    pub schema: Schema,
}

/// Upload directory, session registry and optional SQL assistant
pub struct Datascope {
    upload_dir: PathBuf,
    store: Arc<dyn SessionStore>,
    generator: Option<Arc<dyn SqlGenerator>>,
}

impl Datascope {
    /// Create the facade, creating `upload_dir` if needed.
    pub fn new(upload_dir: impl AsRef<Path>, store: Arc<dyn SessionStore>) -> Result<Self> {
        fs::create_dir_all(upload_dir.as_ref())?;
        let upload_dir = fs::canonicalize(upload_dir.as_ref())?;
        info!("Storing uploads in {}", upload_dir.display());
        Ok(Self {
            upload_dir,
            store,
            generator: None,
        })
    }

    /// In-memory sessions with the default timeout and capacity.
    pub fn with_default_store(upload_dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(upload_dir, Arc::new(SessionManager::default()))
    }

    pub fn with_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.store.session_count()
    }

    /// Persist an uploaded database, introspect it and open a session.
    ///
    /// The file is stored under a fresh UUID name; the client's file name is
    /// only kept for display. A file that cannot be introspected is deleted
    /// and no session is created.
    pub fn upload(&self, bytes: &[u8], original_name: &str) -> Result<UploadResult> {
        let extension = upload_extension(original_name)?;
        if bytes.is_empty() {
            return Err(DatascopeError::InvalidUpload(
                "uploaded file is empty".to_string(),
            ));
        }

        let path = self
            .upload_dir
            .join(format!("{}.{}", Uuid::new_v4().simple(), extension));
        fs::write(&path, bytes)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());

        let schema = match SqliteReader::new(&path).introspect() {
            Ok(schema) => schema,
            Err(err) => {
                remove_file(&path);
                return Err(err);
            }
        };

        let (session_id, evicted) = self.store.create(path, original_name);
        self.discard(evicted);
        info!(
            "Created session {} for '{}' ({} tables)",
            session_id,
            original_name,
            schema.len()
        );

        Ok(UploadResult { session_id, schema })
    }

    fn reader(&self, session_id: &str) -> Result<SqliteReader> {
        let expired = self.store.remove_expired();
        self.discard(expired);
        let path = self.store.resolve(session_id)?;
        Ok(SqliteReader::new(path))
    }

    /// Delete the files of sessions that are gone from the store.
    fn discard(&self, sessions: Vec<Session>) {
        for session in sessions {
            info!("Discarding session {}", session.id);
            if is_within(&session.resource, &self.upload_dir) {
                remove_file(&session.resource);
            } else {
                warn!(
                    "Not deleting {}: outside the upload directory",
                    session.resource.display()
                );
            }
        }
    }

    pub fn schema(&self, session_id: &str) -> Result<Schema> {
        self.reader(session_id)?.introspect()
    }

    /// Mermaid `erDiagram` source for the session's schema.
    pub fn schema_diagram(&self, session_id: &str) -> Result<String> {
        Ok(self.schema(session_id)?.to_mermaid())
    }

    pub fn table_data(
        &self,
        session_id: &str,
        table: &str,
        page: u64,
        page_size: u64,
    ) -> Result<TableData> {
        let reader = self.reader(session_id)?;
        execute::execute_table(&reader, table, page, page_size)
    }

    pub fn run_query(&self, session_id: &str, sql: &str) -> Result<QueryOutcome> {
        let reader = self.reader(session_id)?;
        execute::execute(&reader, sql)
    }

    pub fn explain_query(&self, session_id: &str, sql: &str) -> Result<Vec<PlanStep>> {
        let reader = self.reader(session_id)?;
        execute::explain(&reader, sql)
    }

    pub fn table_insights(&self, session_id: &str, table: &str) -> Result<TableInsights> {
        let reader = self.reader(session_id)?;
        insights::profile(&reader, table)
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        self.store
            .get(session_id)
            .map(|session| session.info())
            .ok_or_else(|| DatascopeError::SessionNotFound(session_id.to_string()))
    }

    /// End a session and delete its database file.
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .store
            .remove(session_id)
            .ok_or_else(|| DatascopeError::SessionNotFound(session_id.to_string()))?;
        self.discard(vec![session]);
        Ok(())
    }

    /// Ask the configured assistant for SQL. The result is never executed.
    pub fn generate_sql(&self, prompt: &str, schema_description: &str) -> Result<String> {
        let generator = self.generator.as_deref().ok_or_else(|| {
            DatascopeError::AssistUnavailable("no API key configured".to_string())
        })?;
        assist::generate_sql(generator, schema_description, prompt)
    }
}

fn upload_extension(original_name: &str) -> Result<String> {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
        _ => Err(DatascopeError::InvalidUpload(format!(
            "'{}' is not a database file; expected one of .{}",
            original_name,
            ALLOWED_EXTENSIONS.join(", .")
        ))),
    }
}

fn remove_file(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Failed to delete {}: {}", path.display(), err);
    }
}
