pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use porter_types::ServiceError;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> porter_types::Result<T>
    where
        F: FnOnce(&Connection) -> porter_types::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ServiceError::internal(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> porter_types::Result<T>
    where
        F: FnOnce(&mut Connection) -> porter_types::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ServiceError::internal(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}
