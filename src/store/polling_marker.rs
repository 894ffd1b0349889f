//! `PollingMarker` singleton cursor for the bootstrap poller.
//!
//! A single fixed row (`id = 1`) rather than an open-ended key space, since
//! there is exactly one polling cycle in flight at a time.

use super::schema::Store;

#[derive(Debug, Clone)]
pub struct PollingMarker {
    pub next_start: i64,
    pub current_key: Option<String>,
}

impl Store {
    pub async fn get_polling_marker(&self) -> Result<PollingMarker, sqlx::Error> {
        let row: (i64, Option<String>) =
            sqlx::query_as("SELECT next_start, current_key FROM polling_marker WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(PollingMarker {
            next_start: row.0,
            current_key: row.1,
        })
    }

    pub async fn put_polling_marker(&self, marker: &PollingMarker) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE polling_marker SET next_start = ?, current_key = ? WHERE id = 1",
        )
        .bind(marker.next_start)
        .bind(&marker.current_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
