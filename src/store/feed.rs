//! `FeedToFetch`, `KnownFeed`, `FeedRecord`, and `FeedEntryRecord`.
//!
//! Pending fetches, known-feed membership, and feed/entry records are all
//! idempotent upserts via `ON CONFLICT DO UPDATE`, keyed by a hash of the
//! topic so repeated publishes of the same feed collapse onto one row. The
//! per-feed failure counter (`fetching_failures`) is a circuit breaker: once
//! it crosses the configured threshold the feed is marked `totally_failed`
//! and the pull worker stops retrying it, though the row is kept around for
//! diagnostics rather than deleted.

use super::keys::{entry_key, topic_key};
use super::schema::Store;

#[derive(Debug, Clone)]
pub struct FeedToFetch {
    pub topic_key: String,
    pub topic: String,
    pub eta: i64,
    pub fetching_failures: u32,
    pub totally_failed: bool,
}

type FeedToFetchRow = (String, String, i64, i64, i64);

fn feed_to_fetch_from_row(row: FeedToFetchRow) -> FeedToFetch {
    let (topic_key, topic, eta, fetching_failures, totally_failed) = row;
    FeedToFetch {
        topic_key,
        topic,
        eta,
        fetching_failures: fetching_failures as u32,
        totally_failed: totally_failed != 0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedRecord {
    pub topic: String,
    pub header_footer: String,
    pub last_updated: i64,
    pub content_type: Option<String>,
    pub last_modified_header: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedEntryRecord {
    pub entry_id: String,
    pub entry_content_hash: String,
    pub update_time: i64,
}

impl Store {
    /// Insert (or idempotently collapse) a pending fetch for `topic`.
    /// Re-insertion resets `eta` and the failure counters so a fresh publish
    /// ping doesn't inherit a stale circuit-breaker count.
    pub async fn insert_feed_to_fetch(&self, topic: &str, now: i64) -> Result<(), sqlx::Error> {
        let key = topic_key(topic);
        sqlx::query(
            r#"
            INSERT INTO feeds_to_fetch (topic_key, topic, eta, fetching_failures, totally_failed)
            VALUES (?, ?, ?, 0, 0)
            ON CONFLICT(topic_key) DO UPDATE SET
                eta = excluded.eta, fetching_failures = 0, totally_failed = 0
            "#,
        )
        .bind(&key)
        .bind(topic)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_feed_to_fetch(&self, topic: &str) -> Result<(), sqlx::Error> {
        let key = topic_key(topic);
        sqlx::query("DELETE FROM feeds_to_fetch WHERE topic_key = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `FeedToFetch`s ready for the pull worker's lease-dispatcher query.
    pub async fn ready_to_fetch(&self, now: i64, limit: i64) -> Result<Vec<FeedToFetch>, sqlx::Error> {
        let rows: Vec<FeedToFetchRow> = sqlx::query_as(
            "SELECT topic_key, topic, eta, fetching_failures, totally_failed \
             FROM feeds_to_fetch WHERE totally_failed = 0 AND eta <= ? ORDER BY eta LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(feed_to_fetch_from_row).collect())
    }

    /// Bump the feed's failure counter and push `eta` out geometrically;
    /// stop retrying past `max_failures` but keep the record for diagnostics.
    pub async fn record_fetch_failure(
        &self,
        topic: &str,
        now: i64,
        retry_period_seconds: i64,
        max_failures: u32,
    ) -> Result<(), sqlx::Error> {
        let key = topic_key(topic);
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT fetching_failures FROM feeds_to_fetch WHERE topic_key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
        let Some((failures,)) = row else {
            return Ok(());
        };
        let failures = failures as u32 + 1;
        let totally_failed = failures >= max_failures;
        let delay = retry_period_seconds.saturating_mul(1i64 << failures.min(62));

        sqlx::query(
            "UPDATE feeds_to_fetch SET fetching_failures = ?, eta = ?, totally_failed = ? \
             WHERE topic_key = ?",
        )
        .bind(failures as i64)
        .bind(now + delay)
        .bind(totally_failed as i64)
        .bind(&key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_known_feed(&self, topic: &str) -> Result<(), sqlx::Error> {
        let key = topic_key(topic);
        sqlx::query("INSERT OR IGNORE INTO known_feeds (topic_key, topic) VALUES (?, ?)")
            .bind(&key)
            .bind(topic)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_known_feed(&self, topic: &str) -> Result<(), sqlx::Error> {
        let key = topic_key(topic);
        sqlx::query("DELETE FROM known_feeds WHERE topic_key = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_known_feed(&self, topic: &str) -> Result<bool, sqlx::Error> {
        let key = topic_key(topic);
        let row: Option<(String,)> =
            sqlx::query_as("SELECT topic_key FROM known_feeds WHERE topic_key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn known_feed_count(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM known_feeds")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Page of `KnownFeed` topics ordered by key, for the bootstrap poller's
    /// cursor scan.
    pub async fn known_feeds_after(
        &self,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT topic_key, topic FROM known_feeds WHERE topic_key > ? \
             ORDER BY topic_key LIMIT ?",
        )
        .bind(cursor.unwrap_or(""))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_feed_record(&self, topic: &str) -> Result<Option<FeedRecord>, sqlx::Error> {
        let key = topic_key(topic);
        let row: Option<(String, String, i64, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT topic, header_footer, last_updated, content_type, \
                 last_modified_header, etag FROM feed_records WHERE topic_key = ?",
            )
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(
            |(topic, header_footer, last_updated, content_type, last_modified_header, etag)| {
                FeedRecord {
                    topic,
                    header_footer,
                    last_updated,
                    content_type,
                    last_modified_header,
                    etag,
                }
            },
        ))
    }

    pub async fn get_entry_record(
        &self,
        topic: &str,
        entry_id: &str,
    ) -> Result<Option<FeedEntryRecord>, sqlx::Error> {
        let topic_k = topic_key(topic);
        let entry_k = entry_key(entry_id);
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT entry_id, entry_content_hash, update_time FROM feed_entry_records \
             WHERE topic_key = ? AND entry_key = ?",
        )
        .bind(&topic_k)
        .bind(&entry_k)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(entry_id, entry_content_hash, update_time)| FeedEntryRecord {
            entry_id,
            entry_content_hash,
            update_time,
        }))
    }

    /// Commit a pull's diff in one transaction: the updated `FeedRecord`,
    /// every new/changed `FeedEntryRecord`, and (if the diff produced new
    /// entries) a brand-new `EventToDeliver` row. The event is always a
    /// fresh insert, never merged into an existing row for the topic --
    /// a topic can have more than one event outstanding (e.g. a prior
    /// diff still retrying delivery), and folding a new payload into that
    /// row would silently discard its in-flight delivery state.
    pub async fn commit_pull(
        &self,
        topic: &str,
        record: &FeedRecord,
        new_entries: &[(String, String, i64)],
        event_payload: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let topic_k = topic_key(topic);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feed_records
                (topic_key, topic, header_footer, last_updated, content_type,
                 last_modified_header, etag)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(topic_key) DO UPDATE SET
                header_footer = excluded.header_footer,
                last_updated = excluded.last_updated,
                content_type = excluded.content_type,
                last_modified_header = excluded.last_modified_header,
                etag = excluded.etag
            "#,
        )
        .bind(&topic_k)
        .bind(topic)
        .bind(&record.header_footer)
        .bind(record.last_updated)
        .bind(&record.content_type)
        .bind(&record.last_modified_header)
        .bind(&record.etag)
        .execute(&mut *tx)
        .await?;

        for (entry_id, content_hash, update_time) in new_entries {
            let entry_k = entry_key(entry_id);
            sqlx::query(
                r#"
                INSERT INTO feed_entry_records
                    (topic_key, entry_key, entry_id, entry_content_hash, update_time)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(topic_key, entry_key) DO UPDATE SET
                    entry_content_hash = excluded.entry_content_hash,
                    update_time = excluded.update_time
                "#,
            )
            .bind(&topic_k)
            .bind(&entry_k)
            .bind(entry_id)
            .bind(content_hash)
            .bind(update_time)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(payload) = event_payload {
            sqlx::query(
                r#"
                INSERT INTO events_to_deliver
                    (topic_key, topic, payload, last_callback, failed_callbacks,
                     delivery_mode, retry_attempts, last_modified, totally_failed)
                VALUES (?, ?, ?, NULL, '[]', 'normal', 0, ?, 0)
                "#,
            )
            .bind(&topic_k)
            .bind(topic)
            .bind(payload)
            .bind(record.last_updated)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}
