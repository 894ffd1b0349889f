//! Bootstrap poller.
//!
//! A safety net: periodically walks every `KnownFeed` and re-enqueues a
//! fetch, so publishers that never call `/publish` are still discovered.

use crate::error::Error;
use crate::http::AppState;
use crate::lease::{query_and_own, Candidate};
use crate::store::PollingMarker;

const LEASE_KEY: &str = "bootstrap-poller";

/// Claims the singleton polling marker and advances one chunk of the active
/// cycle (or starts a new one). Returns whether any work happened.
pub async fn run_once(state: &AppState) -> Result<bool, Error> {
    let now = state.clock.now();
    let store = state.store.clone();

    let claimed = query_and_own(
        &state.lease_table,
        state.config.lease.lease_seconds,
        1,
        state.config.lease.sample_ratio,
        state.config.lease.lock_ratio,
        |_sample_size| async move {
            match store.get_polling_marker().await {
                Ok(marker) => vec![Candidate {
                    key: LEASE_KEY.to_string(),
                    entity: marker,
                }],
                Err(_) => Vec::new(),
            }
        },
    )
    .await;

    let Some(candidate) = claimed.into_iter().next() else {
        return Ok(false);
    };

    let result = process_one(state, candidate.entity, now).await;
    state.lease_table.release(&candidate.key);
    result
}

async fn process_one(state: &AppState, mut marker: PollingMarker, now: i64) -> Result<bool, Error> {
    if marker.next_start <= now {
        marker.next_start = now + state.config.bootstrap.period_seconds;
        marker.current_key = None;
    } else if marker.current_key.is_none() {
        return Ok(false);
    }

    let chunk_size = state.config.bootstrap.feed_chunk_size as i64;
    let feeds = state
        .store
        .known_feeds_after(marker.current_key.as_deref(), chunk_size)
        .await?;

    for (_, topic) in &feeds {
        state.store.insert_feed_to_fetch(topic, now).await?;
    }

    marker.current_key = feeds.last().map(|(key, _)| key.clone());
    state.store.put_polling_marker(&marker).await?;

    Ok(true)
}
