//! # AgentFlow Database
//!
//! Single SQLite database holding one JSON snapshot per engine namespace,
//! at `.agentflow/agentflow.db` by default.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::store::Namespace;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Snapshot database shared by the engines
pub struct FlowDb {
    conn: Arc<Mutex<Connection>>,
}

impl FlowDb {
    /// Open database at a path, creating parent directories as needed
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!("Failed to open agentflow database: {}", path.as_ref().display())
        })?;
        Self::from_connection(conn)
    }

    /// Private database for tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
            tracing::info!("AgentFlow database migrated to v{}", SCHEMA_VERSION);
        }

        Ok(())
    }

    /// Migration to version 1 - snapshot table
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                namespace TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // =========================================================================
    // Snapshot Methods
    // =========================================================================

    /// Store a namespace's snapshot (upsert)
    pub fn save_snapshot(&self, namespace: Namespace, data: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO snapshots (namespace, data, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(namespace) DO UPDATE SET
                data = ?2,
                updated_at = datetime('now')
            "#,
            params![namespace.as_str(), data],
        )
        .with_context(|| format!("Failed to save '{}' snapshot", namespace.as_str()))?;

        tracing::debug!(namespace = namespace.as_str(), bytes = data.len(), "Snapshot saved");
        Ok(())
    }

    /// Read a namespace's snapshot, if one was saved
    pub fn load_snapshot(&self, namespace: Namespace) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT data FROM snapshots WHERE namespace = ?1",
            params![namespace.as_str()],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to load '{}' snapshot", namespace.as_str()))
    }

    pub fn delete_snapshot(&self, namespace: Namespace) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let deleted = conn.execute(
            "DELETE FROM snapshots WHERE namespace = ?1",
            params![namespace.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Namespaces with a stored snapshot, with their last update time
    pub fn list_snapshots(&self) -> Result<Vec<(String, String)>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT namespace, updated_at FROM snapshots ORDER BY namespace")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }
}
