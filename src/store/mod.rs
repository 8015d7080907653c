//! State persistence module
//!
//! SQLite-backed store for servers, settings, tasks, executions, proxy
//! routes and identity records. One connection behind an async mutex; WAL
//! mode for concurrent readers.

mod auth;
mod routes;
mod servers;
mod settings;
mod tasks;

pub use auth::AuthConfig;
pub use settings::SettingRow;

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Error::NotFound("record", what),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Main database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init_tables(&conn)?;

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                mod_loader TEXT NOT NULL,
                game_version TEXT NOT NULL,
                container_id TEXT,
                status TEXT NOT NULL,
                port INTEGER NOT NULL,
                rcon_port INTEGER NOT NULL,
                memory_mb INTEGER NOT NULL,
                auto_start INTEGER NOT NULL DEFAULT 0,
                detached INTEGER NOT NULL DEFAULT 0,
                proxy_hostname TEXT,
                data_path TEXT NOT NULL,
                last_started INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Property bag: one row per (server, key); the nil server id
            -- holds global defaults.
            CREATE TABLE IF NOT EXISTS server_settings (
                server_id TEXT NOT NULL,
                category TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (server_id, key)
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL,
                name TEXT NOT NULL,
                task_type TEXT NOT NULL,
                schedule TEXT NOT NULL,
                cron_expr TEXT,
                interval_secs INTEGER,
                run_at INTEGER,
                timeout_secs INTEGER NOT NULL DEFAULT 0,
                require_online INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                next_run INTEGER,
                last_run INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_due
                ON scheduled_tasks(status, next_run);

            -- Append-only execution history
            CREATE TABLE IF NOT EXISTS task_executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                server_id TEXT NOT NULL,
                status TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                duration_ms INTEGER,
                output TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executions_task
                ON task_executions(task_id, started_at);

            CREATE TABLE IF NOT EXISTS proxy_routes (
                server_id TEXT PRIMARY KEY,
                hostname TEXT NOT NULL,
                backend_address TEXT NOT NULL,
                listener_ports TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                token_digest TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                jwt_secret TEXT NOT NULL,
                recovery_key_digest TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

/// Millisecond timestamp helpers shared by the row mappers.
pub(crate) fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

pub(crate) fn opt_to_millis(ts: &Option<DateTime<Utc>>) -> Option<i64> {
    ts.as_ref().map(to_millis)
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}
