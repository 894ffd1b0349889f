//! Subscription confirmation state machine.

mod common;

use common::test_store;
use hubbub::store::SubscriptionState;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn request_insert_is_a_no_op_once_verified() {
    let store = test_store().await;
    let now = 1_000;

    store
        .insert_verified("https://sub.example/cb", "https://pub.example/feed", "tok", now, 90)
        .await
        .expect("insert_verified");

    store
        .request_insert("https://sub.example/cb", "https://pub.example/feed", "tok2", now + 10, 90)
        .await
        .expect("request_insert");

    let sub = store
        .get_subscription("https://sub.example/cb", "https://pub.example/feed")
        .await
        .expect("query")
        .expect("subscription exists");
    assert_eq!(sub.state, SubscriptionState::Verified);
    assert_eq!(sub.verify_token, "tok");
}

#[tokio::test]
async fn request_remove_on_verified_moves_to_pending_delete() {
    let store = test_store().await;
    let now = 1_000;
    let callback = "https://sub.example/cb";
    let topic = "https://pub.example/feed";

    store.insert_verified(callback, topic, "tok", now, 90).await.expect("insert_verified");

    let existed = store
        .request_remove(callback, topic, "tok-unsub", now + 5)
        .await
        .expect("request_remove");
    assert!(existed);

    let sub = store.get_subscription(callback, topic).await.expect("query").expect("still present");
    assert_eq!(sub.state, SubscriptionState::PendingDelete);
    assert_eq!(sub.verify_token, "tok-unsub");
}

#[tokio::test]
async fn request_remove_on_pending_delete_is_a_no_op() {
    let store = test_store().await;
    let now = 1_000;
    let callback = "https://sub.example/cb";
    let topic = "https://pub.example/feed";

    store.insert_verified(callback, topic, "tok", now, 90).await.expect("insert_verified");
    store.request_remove(callback, topic, "first-unsub", now + 5).await.expect("request_remove");
    store.request_remove(callback, topic, "second-unsub", now + 10).await.expect("request_remove");

    let sub = store.get_subscription(callback, topic).await.expect("query").expect("still present");
    assert_eq!(sub.state, SubscriptionState::PendingDelete);
    assert_eq!(sub.verify_token, "first-unsub");
}

#[tokio::test]
async fn confirm_failures_back_off_geometrically_then_delete_past_cap() {
    let store = test_store().await;
    let now = 1_000;
    let callback = "https://sub.example/cb";
    let topic = "https://pub.example/feed";

    store
        .request_insert(callback, topic, "tok", now, 90)
        .await
        .expect("request_insert");
    let key = store.get_subscription(callback, topic).await.expect("query").expect("present").subscription_key;

    store.record_confirm_failure(&key, now, 300, 3).await.expect("failure 1");
    let after_first = store.get_subscription_by_key(&key).await.expect("query").expect("still present");
    assert_eq!(after_first.confirm_failures, 1);
    assert_eq!(after_first.eta, now + 300 * 2);

    store.record_confirm_failure(&key, now, 300, 3).await.expect("failure 2");
    let after_second = store.get_subscription_by_key(&key).await.expect("query").expect("still present");
    assert_eq!(after_second.confirm_failures, 2);
    assert_eq!(after_second.eta, now + 300 * 4);

    store.record_confirm_failure(&key, now, 300, 3).await.expect("failure 3 deletes");
    let gone = store.get_subscription_by_key(&key).await.expect("query");
    assert!(gone.is_none());
}
