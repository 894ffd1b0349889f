//! `EventToDeliver`: a deliverable payload for one diff of one topic.
//!
//! Each row is its own event, not a per-topic singleton: a topic can have
//! several diffs in flight at once (a second pull can land while the first
//! diff's delivery is still retrying), and collapsing them onto one row per
//! topic would silently fold a fresh payload into an in-flight retry,
//! resetting or discarding `delivery_mode`/`last_callback`/`failed_callbacks`
//! out from under the worker mid-pass. The row's id is assigned by SQLite on
//! insert and is otherwise opaque; de-duping overlapping publish events is
//! the publish endpoint's job, not this table's.
//!
//! `failed_callbacks` round-trips through a single `TEXT` column as JSON
//! rather than a second table, since it is always read and written as a
//! whole list alongside the rest of the row.

use super::keys::topic_key;
use super::schema::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Normal,
    Retry,
}

impl DeliveryMode {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Normal => "normal",
            DeliveryMode::Retry => "retry",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "retry" => DeliveryMode::Retry,
            _ => DeliveryMode::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventToDeliver {
    pub id: i64,
    pub topic_key: String,
    pub topic: String,
    pub payload: String,
    pub last_callback: Option<String>,
    pub failed_callbacks: Vec<String>,
    pub delivery_mode: DeliveryMode,
    pub retry_attempts: u32,
    pub last_modified: i64,
    pub totally_failed: bool,
}

type EventRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    i64,
    i64,
);

fn from_row(row: EventRow) -> EventToDeliver {
    let (
        id,
        topic_key,
        topic,
        payload,
        last_callback,
        failed_callbacks_json,
        delivery_mode,
        retry_attempts,
        last_modified,
        totally_failed,
    ) = row;
    EventToDeliver {
        id,
        topic_key,
        topic,
        payload,
        last_callback,
        failed_callbacks: serde_json::from_str(&failed_callbacks_json).unwrap_or_default(),
        delivery_mode: DeliveryMode::parse(&delivery_mode),
        retry_attempts: retry_attempts as u32,
        last_modified,
        totally_failed: totally_failed != 0,
    }
}

const SELECT_COLUMNS: &str = "id, topic_key, topic, payload, last_callback, failed_callbacks, \
     delivery_mode, retry_attempts, last_modified, totally_failed";

impl Store {
    /// Events ready for the push worker's claim query, oldest-due first.
    pub async fn ready_to_deliver(
        &self,
        now: i64,
        limit: i64,
    ) -> Result<Vec<EventToDeliver>, sqlx::Error> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM events_to_deliver \
             WHERE totally_failed = 0 AND last_modified <= ? ORDER BY last_modified LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    pub async fn get_event_by_id(&self, id: i64) -> Result<Option<EventToDeliver>, sqlx::Error> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM events_to_deliver WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    /// Finds a single event for `topic`, for callers (tests, diagnostics)
    /// that know only one is outstanding. Workers never use this: they
    /// operate on the specific id a claim returned, since several events can
    /// coexist per topic.
    pub async fn get_event_by_topic(&self, topic: &str) -> Result<Option<EventToDeliver>, sqlx::Error> {
        let key = topic_key(topic);
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM events_to_deliver WHERE topic_key = ? ORDER BY id LIMIT 1"
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    pub async fn delete_event(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM events_to_deliver WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persists the post-chunk state computed by the push worker.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_event_progress(
        &self,
        id: i64,
        last_callback: Option<&str>,
        failed_callbacks: &[String],
        delivery_mode: DeliveryMode,
        retry_attempts: u32,
        last_modified: i64,
        totally_failed: bool,
    ) -> Result<(), sqlx::Error> {
        let failed_json = serde_json::to_string(failed_callbacks).unwrap_or_else(|_| "[]".into());
        sqlx::query(
            "UPDATE events_to_deliver SET last_callback = ?, failed_callbacks = ?, \
             delivery_mode = ?, retry_attempts = ?, last_modified = ?, totally_failed = ? \
             WHERE id = ?",
        )
        .bind(last_callback)
        .bind(failed_json)
        .bind(delivery_mode.as_str())
        .bind(retry_attempts as i64)
        .bind(last_modified)
        .bind(totally_failed as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
