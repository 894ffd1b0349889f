//! Push-delivery worker against mock subscriber callback servers.

mod common;

use common::{test_state_with_config, test_store};
use hubbub::clock::FixedClock;
use hubbub::config::Config;
use hubbub::store::DeliveryMode;
use hubbub::workers::push;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn full_success_deletes_the_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let store = test_store().await;
    let topic = "https://pub.example/feed.xml";
    let callback = format!("{}/callback", server.uri());
    store.insert_verified(&callback, topic, "tok", 1_000, 90).await.expect("insert_verified");
    store
        .commit_pull(
            topic,
            &hubbub::store::FeedRecord {
                topic: topic.to_string(),
                header_footer: "<feed></feed>".to_string(),
                last_updated: 1_000,
                content_type: None,
                last_modified_header: None,
                etag: None,
            },
            &[("e1".to_string(), "hash1".to_string(), 1_000)],
            Some("<feed><entry><id>e1</id></entry></feed>"),
        )
        .await
        .expect("commit_pull");

    let state = test_state_with_config(store, FixedClock::new(1_000), Config::default());
    let did_work = push::run_once(&state).await.expect("run_once");
    assert!(did_work);

    let event = state.store.get_event_by_topic(topic).await.expect("query");
    assert!(event.is_none());
}

#[tokio::test]
async fn a_timed_out_subscriber_moves_the_event_into_retry_mode() {
    let fast = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&fast).await;

    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&slow)
        .await;

    let store = test_store().await;
    let topic = "https://pub.example/feed.xml";
    let fast_callback = format!("{}/callback", fast.uri());
    let slow_callback = format!("{}/callback", slow.uri());
    store.insert_verified(&fast_callback, topic, "tok", 1_000, 90).await.expect("insert_verified fast");
    store.insert_verified(&slow_callback, topic, "tok", 1_000, 90).await.expect("insert_verified slow");
    store
        .commit_pull(
            topic,
            &hubbub::store::FeedRecord {
                topic: topic.to_string(),
                header_footer: "<feed></feed>".to_string(),
                last_updated: 1_000,
                content_type: None,
                last_modified_header: None,
                etag: None,
            },
            &[("e1".to_string(), "hash1".to_string(), 1_000)],
            Some("<feed><entry><id>e1</id></entry></feed>"),
        )
        .await
        .expect("commit_pull");

    let mut config = Config::default();
    config.delivery.deadline_seconds = 1;
    config.delivery.chunk_size = 10;
    let state = test_state_with_config(store, FixedClock::new(1_000), config);

    let did_work = push::run_once(&state).await.expect("run_once");
    assert!(did_work);

    let event = state.store.get_event_by_topic(topic).await.expect("query").expect("event persists for retry");
    assert_eq!(event.delivery_mode, DeliveryMode::Retry);
    assert_eq!(event.retry_attempts, 1);
    assert_eq!(event.failed_callbacks.len(), 1);
    assert!(event.last_modified > 1_000);
}
