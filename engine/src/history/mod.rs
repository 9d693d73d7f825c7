//! History store for completed transfers

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::download::Scheme;

/// One completed transfer, appended to the history store exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub filename: String,
    pub url: String,
    pub scheme: Scheme,
    pub destination: PathBuf,
    pub completed_at: DateTime<Utc>,
    pub total_size: Option<u64>,
}

/// Append-only SQLite store of completed transfers.
///
/// Records are inserted on completion and never updated or deleted.
#[derive(Clone)]
pub struct History {
    conn: Arc<Mutex<Connection>>,
}

impl History {
    /// Open the history database at its default location.
    pub fn open_default() -> Result<Self> {
        let path = crate::config::config_dir().join("history.db");
        Self::open(&path)
    }

    /// Open (or create) the history database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let history = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        history.initialize_schema()?;
        Ok(history)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                url TEXT NOT NULL,
                scheme TEXT NOT NULL,
                destination TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                total_size INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_history_completed_at ON history(completed_at);
            "#,
        )?;

        Ok(())
    }

    /// Append one completion record.
    pub fn record(&self, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO history (filename, url, scheme, destination, completed_at, total_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                record.filename,
                record.url,
                record.scheme.as_str(),
                record.destination.to_string_lossy(),
                record.completed_at.to_rfc3339(),
                record.total_size,
            ],
        )?;

        Ok(())
    }

    /// All records in insertion order.
    pub fn all(&self) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT filename, url, scheme, destination, completed_at, total_size
            FROM history
            ORDER BY id ASC
            "#,
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(HistoryRecord {
                    filename: row.get(0)?,
                    url: row.get(1)?,
                    scheme: Scheme::parse(&row.get::<_, String>(2)?).unwrap_or(Scheme::Https),
                    destination: PathBuf::from(row.get::<_, String>(3)?),
                    completed_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    total_size: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }
}
