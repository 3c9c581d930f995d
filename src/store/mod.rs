mod error;
mod models;
mod queries;

pub use error::{StoreError, StoreResult};
pub use models::*;
pub use queries::UpdateSummary;

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Current layout of the tables created by [`Store::migrate`].
pub const SCHEMA_VERSION: u32 = 2;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Store { conn };
        store.migrate()?;
        tracing::debug!("opened store at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Store { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                kind TEXT NOT NULL DEFAULT 'general',
                status TEXT NOT NULL DEFAULT 'planning',
                priority TEXT NOT NULL DEFAULT 'medium',
                estimated_effort REAL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_date TEXT NOT NULL,
                target_date TEXT,
                owner TEXT,
                stakeholders TEXT NOT NULL DEFAULT '[]',
                custom_fields TEXT NOT NULL DEFAULT '{}',
                last_accessed TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_single_active
                ON projects(is_active) WHERE is_active = 1;

            CREATE TABLE IF NOT EXISTS work_items (
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                id TEXT NOT NULL,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                parent_id TEXT,
                estimated_effort REAL,
                assignee TEXT,
                created_date TEXT NOT NULL,
                updated_date TEXT NOT NULL,
                start_date TEXT,
                due_date TEXT,
                completed_date TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                acceptance_criteria TEXT NOT NULL DEFAULT '[]',
                dependencies TEXT NOT NULL DEFAULT '[]',
                custom_fields TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (project_id, id)
            );

            CREATE TABLE IF NOT EXISTS metadata (
                project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
                version INTEGER,
                last_updated TEXT,
                total_work_items INTEGER NOT NULL DEFAULT 0,
                completed_work_items INTEGER NOT NULL DEFAULT 0,
                total_estimated_effort REAL NOT NULL DEFAULT 0.0,
                schema_version INTEGER
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Flush and close the underlying connection.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("failed to close database")
    }

    /// Begin a write transaction. Dropping it without `commit` rolls back.
    fn begin(&mut self) -> StoreResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}
