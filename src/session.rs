//! Session management for uploaded databases
//!
//! Sessions bind an opaque id to one uploaded database file. Each session:
//! - Has a unique, hyphen-free UUID
//! - Points at the absolute path of its database file
//! - Has a last-activity timestamp for timeout cleanup
//!
//! The registry is used through the [`SessionStore`] trait so the in-memory
//! [`SessionManager`] can be swapped for a persistent store. Expired or
//! evicted sessions are handed back to the caller, which owns deleting their
//! files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{DatascopeError, Result};

/// A session bound to one database file
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Database file backing this session
    pub resource: PathBuf,
    /// File name the client uploaded
    pub original_name: String,
    /// Wall-clock creation time, for listings
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp for timeout tracking
    pub last_activity: Instant,
}

impl Session {
    /// Create a new session with a generated UUID
    pub fn new(resource: PathBuf, original_name: impl Into<String>) -> Self {
        Self {
            id: new_session_id(),
            resource,
            original_name: original_name.into(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if session has expired. A zero timeout never expires.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        !timeout.is_zero() && self.last_activity.elapsed() > timeout
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            file_name: self.original_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// Client-facing description of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Storage for session id → database file mappings
pub trait SessionStore: Send + Sync {
    /// Register a database file and return the new session id, together with
    /// any sessions evicted to make room (expired or over capacity).
    fn create(&self, resource: PathBuf, original_name: &str) -> (String, Vec<Session>);

    /// Look up the database file for a session and refresh its activity.
    ///
    /// # Errors
    ///
    /// `DatascopeError::SessionNotFound` for unknown or expired ids.
    fn resolve(&self, id: &str) -> Result<PathBuf>;

    /// Snapshot of a live session.
    fn get(&self, id: &str) -> Option<Session>;

    /// Delete a session, returning it for file cleanup.
    fn remove(&self, id: &str) -> Option<Session>;

    /// Delete every expired session, returning them for file cleanup.
    fn remove_expired(&self) -> Vec<Session>;

    /// Number of stored sessions (for health check)
    fn session_count(&self) -> usize;
}

/// Manages all active sessions in memory
pub struct SessionManager {
    /// Active sessions indexed by session ID
    sessions: RwLock<HashMap<String, Session>>,
    /// Session inactivity timeout (zero disables expiry)
    timeout: Duration,
    /// Maximum live sessions (zero disables the bound)
    max_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager with the specified timeout and capacity
    pub fn new(timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            max_sessions,
        }
    }

    pub fn from_minutes(timeout_minutes: u64, max_sessions: usize) -> Self {
        Self::new(Duration::from_secs(timeout_minutes * 60), max_sessions)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        // Every update is a single map operation; a poisoned map is consistent.
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn drain_expired(&self, sessions: &mut HashMap<String, Session>) -> Vec<Session> {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(self.timeout))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::from_minutes(60, 256)
    }
}

impl SessionStore for SessionManager {
    fn create(&self, resource: PathBuf, original_name: &str) -> (String, Vec<Session>) {
        let mut sessions = self.write();
        let mut evicted = self.drain_expired(&mut sessions);

        if self.max_sessions > 0 {
            while sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .values()
                    .min_by_key(|s| s.last_activity)
                    .map(|s| s.id.clone());
                match oldest.and_then(|id| sessions.remove(&id)) {
                    Some(session) => evicted.push(session),
                    None => break,
                }
            }
        }

        let mut session = Session::new(resource, original_name);
        while sessions.contains_key(&session.id) {
            session.id = new_session_id();
        }
        let id = session.id.clone();
        sessions.insert(id.clone(), session);
        (id, evicted)
    }

    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let mut sessions = self.write();
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired(self.timeout) => {
                session.touch();
                Ok(session.resource.clone())
            }
            _ => Err(DatascopeError::SessionNotFound(id.to_string())),
        }
    }

    fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.read();
        sessions
            .get(id)
            .filter(|s| !s.is_expired(self.timeout))
            .cloned()
    }

    fn remove(&self, id: &str) -> Option<Session> {
        self.write().remove(id)
    }

    fn remove_expired(&self) -> Vec<Session> {
        let mut sessions = self.write();
        self.drain_expired(&mut sessions)
    }

    fn session_count(&self) -> usize {
        self.read().len()
    }
}

/// Whether `path` lives inside `dir`; used before deleting session files.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_session_creation() {
        let session = Session::new(PathBuf::from("/tmp/a.db"), "a.db");
        assert_eq!(session.id.len(), 32);
        assert!(!session.id.contains('-'));
        assert_eq!(session.original_name, "a.db");
    }

    #[test]
    fn test_session_manager_create_resolve_remove() {
        let manager = SessionManager::from_minutes(30, 0);
        let (id, evicted) = manager.create(PathBuf::from("/tmp/a.db"), "a.db");
        assert!(evicted.is_empty());
        assert_eq!(manager.resolve(&id).unwrap(), PathBuf::from("/tmp/a.db"));

        let removed = manager.remove(&id);
        assert!(removed.is_some());
        assert!(matches!(
            manager.resolve(&id),
            Err(DatascopeError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_ids_are_distinct() {
        let manager = SessionManager::from_minutes(30, 0);
        let (a, _) = manager.create(PathBuf::from("/tmp/same.db"), "same.db");
        let (b, _) = manager.create(PathBuf::from("/tmp/same.db"), "same.db");
        assert_ne!(a, b);
        assert_eq!(manager.session_count(), 2);
    }

    #[test]
    fn test_unknown_session() {
        let manager = SessionManager::default();
        let err = manager.resolve("nope").unwrap_err();
        assert!(err.to_string().contains("re-upload"));
    }

    #[test]
    fn test_session_expiry() {
        let manager = SessionManager::new(Duration::from_millis(1), 0);
        let (id, _) = manager.create(PathBuf::from("/tmp/a.db"), "a.db");

        sleep(Duration::from_millis(10));

        assert!(manager.resolve(&id).is_err());
        assert!(manager.get(&id).is_none());
        let expired = manager.remove_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let manager = SessionManager::new(Duration::ZERO, 0);
        let (id, _) = manager.create(PathBuf::from("/tmp/a.db"), "a.db");
        sleep(Duration::from_millis(5));
        assert!(manager.resolve(&id).is_ok());
    }

    #[test]
    fn test_capacity_evicts_least_recently_active() {
        let manager = SessionManager::from_minutes(30, 2);
        let (first, _) = manager.create(PathBuf::from("/tmp/1.db"), "1.db");
        sleep(Duration::from_millis(2));
        let (second, _) = manager.create(PathBuf::from("/tmp/2.db"), "2.db");
        sleep(Duration::from_millis(2));

        // Touch the first so the second becomes the eviction candidate
        manager.resolve(&first).unwrap();

        let (_third, evicted) = manager.create(PathBuf::from("/tmp/3.db"), "3.db");
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, second);
        assert_eq!(manager.session_count(), 2);
        assert!(manager.resolve(&first).is_ok());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within(Path::new("/srv/uploads/x.db"), Path::new("/srv/uploads")));
        assert!(!is_within(Path::new("/etc/passwd"), Path::new("/srv/uploads")));
    }
}
