//! Push-delivery worker.
//!
//! Claims one deliverable event via the lease dispatcher, then fans the
//! current chunk of subscribers out concurrently with
//! `futures::stream::iter(..).buffer_unordered(..)`, bounded by a
//! `tokio::time::timeout` deadline so one slow subscriber can't stall the
//! whole chunk.

use crate::error::Error;
use crate::http::{deliver, AppState};
use crate::lease::{query_and_own, Candidate};
use crate::store::{DeliveryMode, EventToDeliver, Subscription};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;

const WORK_COUNT: usize = 1;

/// Claims and processes up to one deliverable event. Returns whether an
/// event was claimed.
pub async fn run_once(state: &AppState) -> Result<bool, Error> {
    let now = state.clock.now();
    let store = state.store.clone();

    let claimed = query_and_own(
        &state.lease_table,
        state.config.lease.lease_seconds,
        WORK_COUNT,
        state.config.lease.sample_ratio,
        state.config.lease.lock_ratio,
        |sample_size| async move {
            let events = store.ready_to_deliver(now, sample_size).await.unwrap_or_default();
            events
                .into_iter()
                .map(|e| Candidate {
                    key: e.id.to_string(),
                    entity: e,
                })
                .collect()
        },
    )
    .await;

    let Some(candidate) = claimed.into_iter().next() else {
        return Ok(false);
    };

    let result = process_one(state, candidate.entity).await;
    state.lease_table.release(&candidate.key);
    result.map(|_| true)
}

struct Chunk {
    subscribers: Vec<Subscription>,
    /// Whether more subscribers/failures remain beyond this chunk.
    more: bool,
    /// The cursor to persist if `more` stays true after delivery.
    next_cursor: Option<String>,
    /// Entries from `failed_callbacks` not touched by this chunk (retry mode
    /// only); carried forward untouched.
    untouched_failures: Vec<String>,
}

async fn select_chunk(state: &AppState, event: &EventToDeliver) -> Result<Chunk, Error> {
    let chunk_size = state.config.delivery.chunk_size;

    match event.delivery_mode {
        DeliveryMode::Normal => {
            let page = state
                .store
                .verified_subscribers_from(&event.topic, event.last_callback.as_deref(), (chunk_size + 1) as i64)
                .await?;
            let more = page.len() > chunk_size;
            let mut subscribers = page;
            subscribers.truncate(chunk_size);
            let next_cursor = subscribers.last().map(|s| s.callback_hash.clone());
            Ok(Chunk {
                subscribers,
                more,
                next_cursor,
                untouched_failures: Vec::new(),
            })
        }
        DeliveryMode::Retry => {
            let attempt_keys: Vec<String> = event.failed_callbacks.iter().take(chunk_size).cloned().collect();

            // Sentinel computed against the untrimmed failed_callbacks slice
            // before truncation -- preserved exactly per the open-question
            // decision recorded in DESIGN.md.
            let (effective_keys, more, sentinel) = match &event.last_callback {
                Some(sentinel) => match attempt_keys.iter().position(|k| k == sentinel) {
                    Some(pos) => (attempt_keys[..pos].to_vec(), false, Some(sentinel.clone())),
                    None => (attempt_keys.clone(), true, Some(sentinel.clone())),
                },
                None => {
                    let sentinel = attempt_keys.first().cloned();
                    (attempt_keys.clone(), true, sentinel)
                }
            };

            let mut subscribers = Vec::with_capacity(effective_keys.len());
            for key in &effective_keys {
                if let Some(sub) = state.store.get_subscription_by_key(key).await? {
                    subscribers.push(sub);
                }
            }

            let effective_set: HashSet<&String> = effective_keys.iter().collect();
            let untouched_failures: Vec<String> = event
                .failed_callbacks
                .iter()
                .filter(|k| !effective_set.contains(k))
                .cloned()
                .collect();

            Ok(Chunk {
                subscribers,
                more,
                next_cursor: sentinel,
                untouched_failures,
            })
        }
    }
}

async fn deliver_chunk(state: &AppState, payload: &str, subscribers: &[Subscription]) -> Vec<Subscription> {
    let deadline = Duration::from_secs(state.config.delivery.deadline_seconds);
    let client = state.outbound.delivery.clone();

    let attempts = stream::iter(subscribers.iter().cloned()).map(|sub| {
        let client = client.clone();
        let payload = payload.to_string();
        async move {
            let ok = deliver(&client, &sub.callback, &payload).await;
            (sub, ok)
        }
    });

    let completed: Vec<(Subscription, bool)> = match tokio::time::timeout(
        deadline,
        attempts.buffer_unordered(subscribers.len().max(1)).collect::<Vec<_>>(),
    )
    .await
    {
        Ok(results) => results,
        // Deadline fired: treat everything as unresolved-for-this-pass.
        Err(_) => Vec::new(),
    };

    let completed_keys: HashSet<String> = completed.iter().map(|(s, _)| s.subscription_key.clone()).collect();

    let mut failed: Vec<Subscription> = completed
        .into_iter()
        .filter_map(|(sub, ok)| if ok { None } else { Some(sub) })
        .collect();

    for sub in subscribers {
        if !completed_keys.contains(&sub.subscription_key) {
            failed.push(sub.clone());
        }
    }

    failed.sort_by(|a, b| a.callback_hash.cmp(&b.callback_hash));
    failed
}

async fn process_one(state: &AppState, event: EventToDeliver) -> Result<(), Error> {
    let chunk = select_chunk(state, &event).await?;
    let newly_failed = deliver_chunk(state, &event.payload, &chunk.subscribers).await;

    let mut failed_callbacks = chunk.untouched_failures;
    failed_callbacks.extend(newly_failed.iter().map(|s| s.subscription_key.clone()));

    let now = state.clock.now();

    if !chunk.more && failed_callbacks.is_empty() {
        state.store.delete_event(event.id).await?;
        return Ok(());
    }

    if !chunk.more {
        let retry_attempts = event.retry_attempts + 1;
        let totally_failed = retry_attempts > state.config.delivery.max_delivery_failures;
        let delay = state
            .config
            .delivery
            .retry_period_seconds
            .saturating_mul(1i64 << event.retry_attempts.min(62));

        state
            .store
            .update_event_progress(
                event.id,
                None,
                &failed_callbacks,
                DeliveryMode::Retry,
                retry_attempts,
                now + delay,
                totally_failed,
            )
            .await?;
        return Ok(());
    }

    state
        .store
        .update_event_progress(
            event.id,
            chunk.next_cursor.as_deref(),
            &failed_callbacks,
            event.delivery_mode,
            event.retry_attempts,
            now,
            false,
        )
        .await?;

    Ok(())
}
