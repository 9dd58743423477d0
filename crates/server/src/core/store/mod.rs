//! Data access layer
//!
//! Every read and write against the relational store goes through `Store`.
//! Each table gets its own file with plain equality-filtered queries; the
//! pool and the per-call timeout live here.

mod messages;
mod notes;
mod otps;
mod users;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Query(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Io(ref e) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(conflict_message(db.message()))
            }
            other => StoreError::Query(other),
        }
    }
}

/// Turns a unique-constraint message into something a client can act on.
fn conflict_message(raw: &str) -> String {
    if raw.contains("users.email") {
        "Email already exists".to_string()
    } else if raw.contains("users.uname") {
        "Username already taken".to_string()
    } else {
        "Record already exists".to_string()
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the relational store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    timeout: Duration,
}

impl Store {
    /// Open a pool against `url` and make sure the schema exists.
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool, timeout };
        store.migrate().await?;

        info!("[Store] Connected to {}", redact_url(url));
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        const SCHEMA: [&str; 6] = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                uname TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                tag TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS notes_user_id ON notes (user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS messages_pair ON messages (sender_id, receiver_id)",
            r#"
            CREATE TABLE IF NOT EXISTS email_otps (
                email TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0
            )
            "#,
        ];

        for statement in SCHEMA {
            self.run(sqlx::query(statement).execute(&self.pool)).await?;
        }
        Ok(())
    }

    /// Await a store call under the configured timeout.
    async fn run<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
