//! Property tests for the geometric backoff math used by the confirm,
//! feed-pull, and push-delivery workers: the k-th retry's earliest eligible
//! time must be strictly monotonic in k, or workers could hammer a failing
//! endpoint instead of backing off.

mod common;

use common::test_store;
use proptest::prelude::*;

proptest! {
    /// Each successive confirm failure must push `eta` strictly further out
    /// than the one before it, for any retry period and any run of failures
    /// short of the cap.
    #[test]
    fn confirm_backoff_is_strictly_monotonic(
        retry_period in 1i64..10_000,
        failure_count in 1u32..8,
    ) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let store = test_store().await;
                let now = 1_000_000i64;
                store
                    .request_insert("https://sub.example/cb", "https://pub.example/feed", "tok", now, 90)
                    .await
                    .unwrap();
                let key = store
                    .get_subscription("https://sub.example/cb", "https://pub.example/feed")
                    .await
                    .unwrap()
                    .unwrap()
                    .subscription_key;

                let mut last_eta = now;
                for _ in 0..failure_count {
                    store
                        .record_confirm_failure(&key, now, retry_period, failure_count + 1)
                        .await
                        .unwrap();
                    let sub = store.get_subscription_by_key(&key).await.unwrap().unwrap();
                    prop_assert!(sub.eta > last_eta);
                    last_eta = sub.eta;
                }
                Ok(())
            })?;
    }

    /// Same monotonicity property for the feed-pull worker's fetch-failure
    /// backoff.
    #[test]
    fn fetch_backoff_is_strictly_monotonic(
        retry_period in 1i64..10_000,
        failure_count in 1u32..8,
    ) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let store = test_store().await;
                let now = 1_000_000i64;
                let topic = "https://pub.example/flaky.xml";
                store.insert_feed_to_fetch(topic, now).await.unwrap();

                let mut last_eta = now;
                for _ in 0..failure_count {
                    store
                        .record_fetch_failure(topic, now, retry_period, failure_count + 1)
                        .await
                        .unwrap();
                    let item = store
                        .ready_to_fetch(i64::MAX, 10)
                        .await
                        .unwrap()
                        .into_iter()
                        .find(|f| f.topic == topic)
                        .unwrap();
                    prop_assert!(item.eta > last_eta);
                    last_eta = item.eta;
                }
                Ok(())
            })?;
    }
}
