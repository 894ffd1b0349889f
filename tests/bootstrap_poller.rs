//! Bootstrap poller safety net.

mod common;

use common::{test_state_with_config, test_store};
use hubbub::clock::FixedClock;
use hubbub::config::Config;
use hubbub::workers::bootstrap;

#[tokio::test]
async fn a_due_cycle_enqueues_every_known_feed_and_advances_the_cursor() {
    let store = test_store().await;
    for i in 0..3 {
        store.insert_known_feed(&format!("https://pub.example/feed{i}.xml")).await.expect("insert_known_feed");
    }

    let mut config = Config::default();
    config.bootstrap.feed_chunk_size = 200;
    let state = test_state_with_config(store, FixedClock::new(1_000), config);

    let did_work = bootstrap::run_once(&state).await.expect("run_once");
    assert!(did_work);

    for i in 0..3 {
        let topic = format!("https://pub.example/feed{i}.xml");
        let ready = state.store.ready_to_fetch(2_000, 10).await.expect("query");
        assert!(ready.iter().any(|f| f.topic == topic));
    }

    let marker = state.store.get_polling_marker().await.expect("query");
    assert!(marker.current_key.is_none());
    assert_eq!(marker.next_start, 1_000 + config_default_bootstrap_period());
}

fn config_default_bootstrap_period() -> i64 {
    Config::default().bootstrap.period_seconds
}

#[tokio::test]
async fn is_a_no_op_before_next_start_with_no_active_cycle() {
    let store = test_store().await;
    store.insert_known_feed("https://pub.example/feed.xml").await.expect("insert_known_feed");

    let state = test_state_with_config(store, FixedClock::new(1_000), Config::default());

    // First tick starts and finishes the cycle immediately (one feed fits in
    // one chunk), leaving next_start far in the future and no active cursor.
    bootstrap::run_once(&state).await.expect("first run_once");

    let did_work = bootstrap::run_once(&state).await.expect("second run_once");
    assert!(!did_work);
}
