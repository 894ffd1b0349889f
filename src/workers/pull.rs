//! Feed-pull worker.
//!
//! Claims a pending fetch via the lease dispatcher, fetches the feed,
//! diffs it against the stored envelope, and commits the result. The
//! diff/splice step lives in [`crate::feed`].

use crate::error::Error;
use crate::feed::{diff_feed, splice_entries, FeedFormat};
use crate::http::{fetch_feed, AppState};
use crate::lease::{query_and_own, Candidate};
use crate::store::{content_hash, FeedRecord, FeedToFetch};
use reqwest::StatusCode;

const WORK_COUNT: usize = 1;

/// Claims and processes up to one pending feed fetch. Returns whether a
/// fetch was claimed.
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
            let items = store.ready_to_fetch(now, sample_size).await.unwrap_or_default();
            items
                .into_iter()
                .map(|f| Candidate {
                    key: f.topic_key.clone(),
                    entity: f,
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

async fn process_one(state: &AppState, item: FeedToFetch) -> Result<(), Error> {
    let topic = item.topic;

    if !state.store.has_subscribers(&topic).await? {
        state.store.delete_feed_to_fetch(&topic).await?;
        state.store.delete_known_feed(&topic).await?;
        return Ok(());
    }

    let existing_record = state.store.get_feed_record(&topic).await?;
    let last_modified = existing_record.as_ref().and_then(|r| r.last_modified_header.as_deref());
    let etag = existing_record.as_ref().and_then(|r| r.etag.as_deref());

    let outcome = match fetch_feed(&state.outbound.feed, &topic, last_modified, etag).await {
        Ok(outcome) => outcome,
        Err(_) => return fetch_failed(state, &topic).await,
    };

    if outcome.status == StatusCode::NOT_MODIFIED {
        state.store.delete_feed_to_fetch(&topic).await?;
        return Ok(());
    }

    if outcome.status != StatusCode::OK {
        return fetch_failed(state, &topic).await;
    }

    let preferred = preferred_format(existing_record.as_ref().and_then(|r| r.content_type.as_deref()));
    let parsed_with_format = [preferred, preferred.other()]
        .into_iter()
        .find_map(|format| diff_feed(&outcome.body, format).ok().map(|result| (format, result)));

    let Some((format, parsed)) = parsed_with_format else {
        return fetch_failed(state, &topic).await;
    };

    let now = state.clock.now();
    let mut new_entries = Vec::new();
    let mut raw_xmls = Vec::new();
    for (entry_id, raw_xml) in &parsed.entries {
        let hash = content_hash(raw_xml);
        let existing = state.store.get_entry_record(&topic, entry_id).await?;
        let changed = match existing {
            Some(record) => record.entry_content_hash != hash,
            None => true,
        };
        if changed {
            new_entries.push((entry_id.clone(), hash, now));
            raw_xmls.push(raw_xml.clone());
        }
    }

    let record = FeedRecord {
        topic: topic.clone(),
        header_footer: parsed.envelope.clone(),
        last_updated: now,
        content_type: outcome.content_type,
        last_modified_header: outcome.last_modified,
        etag: outcome.etag,
    };

    if new_entries.is_empty() {
        state.store.commit_pull(&topic, &record, &[], None).await?;
    } else {
        let payload = splice_entries(&parsed.envelope, &raw_xmls, format);
        state
            .store
            .commit_pull(&topic, &record, &new_entries, Some(&payload))
            .await?;
    }

    state.store.delete_feed_to_fetch(&topic).await?;
    Ok(())
}

/// If the stored content type mentions RSS, try RSS first; otherwise
/// default to Atom first.
fn preferred_format(stored_content_type: Option<&str>) -> FeedFormat {
    match stored_content_type {
        Some(ct) if ct.to_ascii_lowercase().contains("rss") => FeedFormat::Rss,
        _ => FeedFormat::Atom,
    }
}

async fn fetch_failed(state: &AppState, topic: &str) -> Result<(), Error> {
    state
        .store
        .record_fetch_failure(
            topic,
            state.clock.now(),
            state.config.feed_pull.retry_period_seconds,
            state.config.feed_pull.max_fetch_failures,
        )
        .await?;
    Ok(())
}
