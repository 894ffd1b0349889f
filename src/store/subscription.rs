//! Subscription entity and its state machine.
//!
//! A focused per-entity impl block built around an UPSERT-on-conflict idiom
//! for idempotent inserts. Every mutating method runs inside a single
//! statement or single transaction scoped to one `subscription_key`, so two
//! concurrent requests for the same callback/topic pair can't interleave and
//! leave the row in an inconsistent state.

use super::keys::subscription_key;
use super::schema::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    PendingVerify,
    Verified,
    PendingDelete,
}

impl SubscriptionState {
    fn as_str(self) -> &'static str {
        match self {
            SubscriptionState::PendingVerify => "pending_verify",
            SubscriptionState::Verified => "verified",
            SubscriptionState::PendingDelete => "pending_delete",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "verified" => SubscriptionState::Verified,
            "pending_delete" => SubscriptionState::PendingDelete,
            _ => SubscriptionState::PendingVerify,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_key: String,
    pub callback: String,
    pub topic: String,
    pub callback_hash: String,
    pub topic_hash: String,
    pub created_time: i64,
    pub last_modified: i64,
    pub expiration_time: i64,
    pub eta: i64,
    pub confirm_failures: u32,
    pub verify_token: String,
    pub state: SubscriptionState,
}

type SubscriptionRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    String,
    String,
);

fn from_row(row: SubscriptionRow) -> Subscription {
    let (
        subscription_key,
        callback,
        topic,
        callback_hash,
        topic_hash,
        created_time,
        last_modified,
        expiration_time,
        eta,
        confirm_failures,
        verify_token,
        state,
    ) = row;
    Subscription {
        subscription_key,
        callback,
        topic,
        callback_hash,
        topic_hash,
        created_time,
        last_modified,
        expiration_time,
        eta,
        confirm_failures: confirm_failures as u32,
        verify_token,
        state: SubscriptionState::parse(&state),
    }
}

const SELECT_COLUMNS: &str = "subscription_key, callback, topic, callback_hash, topic_hash, \
     created_time, last_modified, expiration_time, eta, confirm_failures, verify_token, state";

impl Store {
    pub async fn get_subscription(
        &self,
        callback: &str,
        topic: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let key = subscription_key(callback, topic);
        self.get_subscription_by_key(&key).await
    }

    pub async fn get_subscription_by_key(
        &self,
        key: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions WHERE subscription_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    /// Synchronous subscribe: absent -> verified; an existing `pending_verify`
    /// is forced to `verified` (the handshake just succeeded, so async
    /// confirmation would be moot).
    pub async fn insert_verified(
        &self,
        callback: &str,
        topic: &str,
        verify_token: &str,
        now: i64,
        expiration_seconds: i64,
    ) -> Result<(), sqlx::Error> {
        let key = subscription_key(callback, topic);
        let mut tx = self.pool.begin().await?;
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT state FROM subscriptions WHERE subscription_key = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some((state,)) if SubscriptionState::parse(&state) != SubscriptionState::PendingDelete => {
                sqlx::query(
                    "UPDATE subscriptions SET state = 'verified', last_modified = ?, eta = ? \
                     WHERE subscription_key = ?",
                )
                .bind(now)
                .bind(now)
                .bind(&key)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query(
                    r#"
                    INSERT INTO subscriptions
                        (subscription_key, callback, topic, callback_hash, topic_hash,
                         created_time, last_modified, expiration_time, eta,
                         confirm_failures, verify_token, state)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 'verified')
                    ON CONFLICT(subscription_key) DO UPDATE SET
                        state = 'verified', last_modified = excluded.last_modified,
                        eta = excluded.eta
                    "#,
                )
                .bind(&key)
                .bind(callback)
                .bind(topic)
                .bind(keys_hash(callback))
                .bind(keys_hash(topic))
                .bind(now)
                .bind(now)
                .bind(now + expiration_seconds)
                .bind(now)
                .bind(verify_token)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }

    /// Synchronous unsubscribe: any state -> deleted.
    pub async fn remove_sync(&self, callback: &str, topic: &str) -> Result<bool, sqlx::Error> {
        let key = subscription_key(callback, topic);
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscription_key = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Asynchronous subscribe: absent -> pending_verify. A no-op if any
    /// subscription (of any state) already exists — in particular, a
    /// `verified` entity never regresses.
    pub async fn request_insert(
        &self,
        callback: &str,
        topic: &str,
        verify_token: &str,
        now: i64,
        expiration_seconds: i64,
    ) -> Result<(), sqlx::Error> {
        let key = subscription_key(callback, topic);
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (subscription_key, callback, topic, callback_hash, topic_hash,
                 created_time, last_modified, expiration_time, eta,
                 confirm_failures, verify_token, state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 'pending_verify')
            ON CONFLICT(subscription_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(callback)
        .bind(topic)
        .bind(keys_hash(callback))
        .bind(keys_hash(topic))
        .bind(now)
        .bind(now)
        .bind(now + expiration_seconds)
        .bind(now)
        .bind(verify_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Asynchronous unsubscribe: any non-`pending_delete` -> `pending_delete`
    /// with a fresh verify token. `pending_delete` is left alone. Returns
    /// `false` if no subscription exists at all.
    pub async fn request_remove(
        &self,
        callback: &str,
        topic: &str,
        verify_token: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let key = subscription_key(callback, topic);
        let mut tx = self.pool.begin().await?;
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT state FROM subscriptions WHERE subscription_key = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((state,)) = existing else {
            tx.commit().await?;
            return Ok(false);
        };

        if SubscriptionState::parse(&state) != SubscriptionState::PendingDelete {
            sqlx::query(
                "UPDATE subscriptions SET state = 'pending_delete', verify_token = ?, \
                 last_modified = ?, eta = ?, confirm_failures = 0 WHERE subscription_key = ?",
            )
            .bind(verify_token)
            .bind(now)
            .bind(now)
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// True iff any `verified` subscription exists for the topic.
    pub async fn has_subscribers(&self, topic: &str) -> Result<bool, sqlx::Error> {
        let topic_hash = keys_hash(topic);
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subscriptions WHERE topic_hash = ? AND state = 'verified'",
        )
        .bind(topic_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }

    /// Verified subscribers of `topic` ordered by `callback_hash`, page
    /// starting at `from_callback_hash` (inclusive), limited to `limit` rows.
    pub async fn verified_subscribers_from(
        &self,
        topic: &str,
        from_callback_hash: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let topic_hash = keys_hash(topic);
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions \
             WHERE topic_hash = ? AND state = 'verified' AND callback_hash >= ? \
             ORDER BY callback_hash LIMIT ?"
        ))
        .bind(topic_hash)
        .bind(from_callback_hash.unwrap_or(""))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Subscriptions in `pending_verify`/`pending_delete` with `eta <= now`,
    /// ordered by `eta`, used as the confirm worker's lease-dispatcher query.
    pub async fn ready_for_confirm(
        &self,
        now: i64,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions \
             WHERE state IN ('pending_verify', 'pending_delete') AND eta <= ? \
             ORDER BY eta LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// HTTP 204 from the verification handshake: apply the intended effect.
    pub async fn apply_confirm_success(&self, key: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT state FROM subscriptions WHERE subscription_key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some((state,)) = existing {
            match SubscriptionState::parse(&state) {
                SubscriptionState::PendingVerify => {
                    sqlx::query("UPDATE subscriptions SET state = 'verified' WHERE subscription_key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
                SubscriptionState::PendingDelete => {
                    sqlx::query("DELETE FROM subscriptions WHERE subscription_key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
                SubscriptionState::Verified => {}
            }
        }
        tx.commit().await
    }

    /// Non-204 from the verification handshake (or transport error): bump
    /// the failure counter and push `eta` out geometrically; give up past
    /// `max_failures`.
    pub async fn record_confirm_failure(
        &self,
        key: &str,
        now: i64,
        retry_period_seconds: i64,
        max_failures: u32,
    ) -> Result<(), sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT confirm_failures FROM subscriptions WHERE subscription_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        let Some((failures,)) = row else {
            return Ok(());
        };
        let failures = failures as u32 + 1;

        if failures >= max_failures {
            sqlx::query("DELETE FROM subscriptions WHERE subscription_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let delay = retry_period_seconds.saturating_mul(1i64 << failures.min(62));
        sqlx::query(
            "UPDATE subscriptions SET confirm_failures = ?, eta = ? WHERE subscription_key = ?",
        )
        .bind(failures as i64)
        .bind(now + delay)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn keys_hash(value: &str) -> String {
    super::keys::topic_key(value)
}
