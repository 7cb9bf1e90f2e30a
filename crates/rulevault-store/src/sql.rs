//! Process-wide SQLite client.
//!
//! Constructed once at startup and handed to every relational component
//! by value (it is a cheap `Arc` clone). Never torn down explicitly.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{StoreError, StoreResult, map_err};
use crate::schema;

/// Shared SQLite connection guarded by a mutex.
#[derive(Clone)]
pub struct SqlClient {
    conn: Arc<Mutex<Connection>>,
}

impl SqlClient {
    /// Open (or create) a database file and install the schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(map_err!(Io))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let client = Self::init(conn)?;
        debug!(?path, "sqlite client opened");
        Ok(client)
    }

    /// Create an ephemeral in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let client = Self::init(conn)?;
        debug!("in-memory sqlite client opened");
        Ok(client)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Borrow the connection for the duration of one statement group.
    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Sql("sqlite connection mutex poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_installs_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.db");
        {
            SqlClient::open(&path, Duration::from_secs(1)).unwrap();
        }
        let client = SqlClient::open(&path, Duration::from_secs(1)).unwrap();
        let conn = client.lock().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('regulations', 'component_regulations', 'run_logs', 'component_use_rules', 'share_nodes')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }
}
