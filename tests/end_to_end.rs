//! End-to-end scenarios against the axum router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{test_state, test_store};
use hubbub::clock::FixedClock;
use hubbub::http::build_router;
use hubbub::workers::{confirm, pull, push};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[tokio::test]
async fn sync_subscribe_happy_path_verifies_immediately() {
    let subscriber = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(204)).mount(&subscriber).await;

    let store = test_store().await;
    let state = test_state(store, FixedClock::new(1_000));
    let router = build_router(state.clone());

    let callback = format!("{}/callback", subscriber.uri());
    let body = form_body(&[
        ("hub.mode", "subscribe"),
        ("hub.callback", &callback),
        ("hub.topic", "https://pub.example/feed.xml"),
        ("hub.verify", "sync"),
        ("hub.verify_token", "tok"),
    ]);

    let response = router
        .oneshot(
            Request::post("/subscribe")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let sub = state
        .store
        .get_subscription(&callback, "https://pub.example/feed.xml")
        .await
        .expect("query")
        .expect("subscription exists");
    assert_eq!(sub.state, hubbub::store::SubscriptionState::Verified);
}

#[tokio::test]
async fn async_subscribe_then_confirm_worker_verifies() {
    let subscriber = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(204)).mount(&subscriber).await;

    let store = test_store().await;
    let state = test_state(store, FixedClock::new(1_000));
    let router = build_router(state.clone());

    let callback = format!("{}/callback", subscriber.uri());
    let body = form_body(&[
        ("hub.mode", "subscribe"),
        ("hub.callback", &callback),
        ("hub.topic", "https://pub.example/feed.xml"),
        ("hub.verify", "async"),
        ("hub.verify_token", "tok"),
    ]);

    let response = router
        .oneshot(
            Request::post("/subscribe")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let sub = state
        .store
        .get_subscription(&callback, "https://pub.example/feed.xml")
        .await
        .expect("query")
        .expect("subscription exists");
    assert_eq!(sub.state, hubbub::store::SubscriptionState::PendingVerify);

    let did_work = confirm::run_once(&state).await.expect("confirm run_once");
    assert!(did_work);

    let sub = state
        .store
        .get_subscription(&callback, "https://pub.example/feed.xml")
        .await
        .expect("query")
        .expect("subscription exists");
    assert_eq!(sub.state, hubbub::store::SubscriptionState::Verified);
}

#[tokio::test]
async fn publish_with_no_known_subscribers_is_a_no_op() {
    let store = test_store().await;
    let state = test_state(store, FixedClock::new(1_000));
    let router = build_router(state.clone());

    let body = form_body(&[("hub.mode", "publish"), ("hub.url", "https://pub.example/unknown.xml")]);

    let response = router
        .oneshot(
            Request::post("/publish")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let ready = state.store.ready_to_fetch(2_000, 10).await.expect("query");
    assert!(ready.is_empty());
}

#[tokio::test]
async fn publish_fans_out_to_verified_subscribers_via_pull_and_push() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<feed><entry><id>e1</id><title>Hello</title></entry></feed>"#,
            "application/atom+xml",
        ))
        .mount(&feed_server)
        .await;

    let subscriber = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&subscriber).await;

    let store = test_store().await;
    let topic = format!("{}/feed.xml", feed_server.uri());
    let callback = format!("{}/callback", subscriber.uri());
    store.insert_known_feed(&topic).await.expect("insert_known_feed");
    store.insert_verified(&callback, &topic, "tok", 1_000, 90).await.expect("insert_verified");

    let state = test_state(store, FixedClock::new(1_000));
    let router = build_router(state.clone());

    let body = form_body(&[("hub.mode", "publish"), ("hub.url", &topic)]);
    let response = router
        .oneshot(
            Request::post("/publish")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let pulled = pull::run_once(&state).await.expect("pull run_once");
    assert!(pulled);

    let event = state.store.get_event_by_topic(&topic).await.expect("query").expect("event emitted");
    assert!(event.payload.contains("Hello"));

    let pushed = push::run_once(&state).await.expect("push run_once");
    assert!(pushed);

    let remaining = state.store.get_event_by_topic(&topic).await.expect("query");
    assert!(remaining.is_none());
}

#[tokio::test]
async fn feed_pull_transient_failures_eventually_reach_totally_failed() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/flaky.xml")).respond_with(ResponseTemplate::new(500)).mount(&feed_server).await;

    let store = test_store().await;
    let topic = format!("{}/flaky.xml", feed_server.uri());
    store.insert_known_feed(&topic).await.expect("insert_known_feed");
    store
        .insert_verified("https://sub.example/cb", &topic, "tok", 1_000, 90)
        .await
        .expect("insert_verified");

    let mut config = hubbub::config::Config::default();
    config.feed_pull.max_fetch_failures = 2;
    let clock = FixedClock::new(1_000);
    let state = common::test_state_with_config(store, clock.clone(), config);

    state.store.insert_feed_to_fetch(&topic, 1_000).await.expect("enqueue");
    pull::run_once(&state).await.expect("pull 1");
    let after_first = state.store.ready_to_fetch(i64::MAX, 10).await.expect("query");
    assert!(after_first.iter().any(|f| f.topic == topic && !f.totally_failed));

    clock.advance(10_000);
    pull::run_once(&state).await.expect("pull 2");
    let after_second = state.store.ready_to_fetch(i64::MAX, 10).await.expect("query");
    assert!(!after_second.iter().any(|f| f.topic == topic));
}

#[tokio::test]
async fn work_endpoints_reject_requests_without_the_operator_secret() {
    let store = test_store().await;
    let mut config = hubbub::config::Config::default();
    config.operator_secret = Some("s3kret".to_string());
    let state = common::test_state_with_config(store, FixedClock::new(1_000), config);
    let router = build_router(state);

    let response = router
        .oneshot(Request::get("/work/pull_feeds").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn work_endpoints_accept_the_matching_operator_secret() {
    let store = test_store().await;
    let mut config = hubbub::config::Config::default();
    config.operator_secret = Some("s3kret".to_string());
    let state = common::test_state_with_config(store, FixedClock::new(1_000), config);
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::get("/work/pull_feeds")
                .header("X-Hub-Operator-Secret", "s3kret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
