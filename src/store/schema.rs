//! Store handle and migrations.
//!
//! A `Store` wrapper around a `SqlitePool`, opened with `busy_timeout`
//! configured so transient lock contention between concurrent workers waits
//! instead of failing outright, and an idempotent `CREATE TABLE IF NOT
//! EXISTS` migration run at startup.
//!
//! Per-topic commits (entries + envelope update + new delivery event) map
//! directly onto a single SQLite `Transaction`, since all three tables live
//! in the same database file.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("another hub process appears to hold the database")]
    InstanceLocked,

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("store error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string().to_lowercase();
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("sqlite_locked")
        {
            return StoreError::InstanceLocked;
        }
        StoreError::Other(err)
    }
}

#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{path}?mode=rwc");
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_key TEXT PRIMARY KEY,
                callback TEXT NOT NULL,
                topic TEXT NOT NULL,
                callback_hash TEXT NOT NULL,
                topic_hash TEXT NOT NULL,
                created_time INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                expiration_time INTEGER NOT NULL,
                eta INTEGER NOT NULL,
                confirm_failures INTEGER NOT NULL DEFAULT 0,
                verify_token TEXT NOT NULL,
                state TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_topic_state \
             ON subscriptions(topic_hash, state, callback_hash)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_eta_state \
             ON subscriptions(state, eta)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds_to_fetch (
                topic_key TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                eta INTEGER NOT NULL,
                fetching_failures INTEGER NOT NULL DEFAULT 0,
                totally_failed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_to_fetch_eta \
             ON feeds_to_fetch(eta) WHERE totally_failed = 0",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS known_feeds (
                topic_key TEXT PRIMARY KEY,
                topic TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_records (
                topic_key TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                header_footer TEXT NOT NULL DEFAULT '',
                last_updated INTEGER NOT NULL,
                content_type TEXT,
                last_modified_header TEXT,
                etag TEXT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_entry_records (
                topic_key TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                entry_content_hash TEXT NOT NULL,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (topic_key, entry_key)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events_to_deliver (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_key TEXT NOT NULL,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL,
                last_callback TEXT,
                failed_callbacks TEXT NOT NULL DEFAULT '[]',
                delivery_mode TEXT NOT NULL DEFAULT 'normal',
                retry_attempts INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL,
                totally_failed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_to_deliver_topic \
             ON events_to_deliver(topic_key)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_to_deliver_eta \
             ON events_to_deliver(last_modified) WHERE totally_failed = 0",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polling_marker (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_start INTEGER NOT NULL,
                current_key TEXT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO polling_marker (id, next_start, current_key) VALUES (1, 0, NULL)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}
