//! Session store: one opaque JSON blob per session id.
//!
//! The blob is only ever read and written by the dialogue manager owning
//! the session; per-session serialization is enforced one level up.

use dbdiag_core::session::SessionState;
use dbdiag_core::{Error, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

fn storage_err(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

/// Summary row for session listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_problem: String,
    pub dialogue_turns: usize,
}

/// SQLite-backed session store.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish()
    }
}

impl SessionStore {
    /// Open the session store in the shared database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(storage_err)?;
        conn.execute_batch(crate::schema::SCHEMA_SQL)
            .map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist (insert or overwrite) a session blob.
    pub fn save(&self, session: &SessionState) -> Result<()> {
        let blob = serde_json::to_string(session)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (session_id, state, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(session_id) DO UPDATE SET state = ?2, updated_at = CURRENT_TIMESTAMP",
            params![session.session_id, blob],
        )
        .map_err(storage_err)?;
        debug!(session_id = %session.session_id, bytes = blob.len(), "session persisted");
        Ok(())
    }

    /// Load a session blob. A corrupt blob is a data-integrity error, not a
    /// missing session.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT state FROM sessions WHERE session_id = ?1")
            .map_err(storage_err)?;
        let mut rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        match rows.next() {
            Some(row) => {
                let blob = row.map_err(storage_err)?;
                let session = serde_json::from_str(&blob).map_err(|e| {
                    Error::integrity(format!("session blob {session_id} is corrupt: {e}"))
                })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recently updated sessions.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT state FROM sessions ORDER BY updated_at DESC LIMIT ?1")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        for row in rows {
            let blob = row.map_err(storage_err)?;
            if let Ok(session) = serde_json::from_str::<SessionState>(&blob) {
                out.push(SessionSummary {
                    session_id: session.session_id,
                    user_problem: session.user_problem,
                    dialogue_turns: session.dialogue_history.len(),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let store = SessionStore::in_memory().unwrap();
        let mut session = SessionState::new("查询变慢");
        session.confirm("P-0001", "确认").unwrap();
        store.save(&session).unwrap();

        let restored = store.load(&session.session_id).unwrap().unwrap();
        assert_eq!(restored.user_problem, "查询变慢");
        assert!(restored.is_confirmed("P-0001"));
    }

    #[test]
    fn test_save_overwrites() {
        let store = SessionStore::in_memory().unwrap();
        let mut session = SessionState::new("problem");
        store.save(&session).unwrap();

        session.deny("P-0002").unwrap();
        store.save(&session).unwrap();

        let restored = store.load(&session.session_id).unwrap().unwrap();
        assert!(restored.is_denied("P-0002"));
    }

    #[test]
    fn test_missing_session_is_none() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.load("no-such-session").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_blob_is_integrity_error() {
        let store = SessionStore::in_memory().unwrap();
        {
            let conn = store.lock();
            conn.execute(
                "INSERT INTO sessions (session_id, state) VALUES ('bad', 'not json')",
                [],
            )
            .unwrap();
        }
        let err = store.load("bad").unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
