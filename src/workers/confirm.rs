//! Subscription confirm worker.
//!
//! Claims one pending subscription via the lease dispatcher, performs the
//! verification handshake, and applies the state transition.

use crate::error::Error;
use crate::http::{verify_handshake, AppState};
use crate::lease::{query_and_own, Candidate};
use crate::store::{Subscription, SubscriptionState};

const WORK_COUNT: usize = 1;

/// Claims and processes up to one pending subscription. Returns whether a
/// subscription was claimed (`false` means there was nothing ready).
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
            let subs = store.ready_for_confirm(now, sample_size).await.unwrap_or_default();
            subs.into_iter()
                .map(|s| Candidate {
                    key: s.subscription_key.clone(),
                    entity: s,
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

async fn process_one(state: &AppState, subscription: Subscription) -> Result<(), Error> {
    let mode = match subscription.state {
        SubscriptionState::PendingVerify => "subscribe",
        SubscriptionState::PendingDelete => "unsubscribe",
        SubscriptionState::Verified => return Ok(()),
    };

    let confirmed = verify_handshake(
        &state.outbound.verify,
        &subscription.callback,
        mode,
        &subscription.topic,
        &subscription.verify_token,
    )
    .await;

    if confirmed {
        state
            .store
            .apply_confirm_success(&subscription.subscription_key)
            .await?;
        if subscription.state == SubscriptionState::PendingVerify {
            state.store.insert_known_feed(&subscription.topic).await?;
        }
    } else {
        state
            .store
            .record_confirm_failure(
                &subscription.subscription_key,
                state.clock.now(),
                state.config.subscription.retry_period_seconds,
                state.config.subscription.max_confirm_failures,
            )
            .await?;
    }

    Ok(())
}
