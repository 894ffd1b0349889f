//! axum router and HTTP handlers.
//!
//! `AppState` bundles every collaborator other handlers and workers need
//! (store, clock, lease table, outbound clients, config) behind a single
//! `Arc`, rather than reaching for module-scope statics, so handlers and
//! workers stay trivially testable with a fresh state per test.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use url::form_urlencoded;

use super::ingress::{parse_verify_mode, validate_url, validate_verify_token, VerifyMode};
use super::outbound::{verify_handshake, OutboundClients};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::Error;
use crate::lease::LeaseTable;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub lease_table: Arc<LeaseTable>,
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub outbound: OutboundClients,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_get).post(root_post))
        .route("/publish", post(publish_handler))
        .route("/subscribe", post(subscribe_handler))
        .route("/work/subscriptions", get(work_subscriptions))
        .route("/work/pull_feeds", get(work_pull_feeds))
        .route("/work/push_events", get(work_push_events))
        .route("/work/poll_bootstrap", get(work_poll_bootstrap))
        .route("/debug", get(debug_get))
        .with_state(state)
}

fn parse_form(body: &[u8]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in form_urlencoded::parse(body) {
        map.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    map
}

fn single<'a>(form: &'a HashMap<String, Vec<String>>, key: &str) -> Result<&'a str, Error> {
    form.get(key)
        .and_then(|values| values.first())
        .map(|s| s.as_str())
        .ok_or_else(|| Error::Validation(format!("missing required field {key}")))
}

async fn root_get(State(state): State<AppState>) -> Result<String, Error> {
    let count = state.store.known_feed_count().await?;
    Ok(format!("hubbub hub -- tracking {count} known feeds\n"))
}

async fn debug_get(State(state): State<AppState>) -> Result<String, Error> {
    let count = state.store.known_feed_count().await?;
    Ok(format!(
        "hubbub debug\nknown_feeds={count}\ndev_mode={}\n",
        state.config.dev_mode
    ))
}

async fn root_post(State(state): State<AppState>, body: Bytes) -> Result<Response, Error> {
    let form = parse_form(&body);
    let mode = single(&form, "hub.mode")?;
    if mode == "publish" {
        Ok(handle_publish(&state, &form).await?.into_response())
    } else {
        Ok(handle_subscribe_form(&state, &form).await?.into_response())
    }
}

async fn publish_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), Error> {
    let form = parse_form(&body);
    let mode = single(&form, "hub.mode")?;
    if mode != "publish" {
        return Err(Error::Validation(format!("unsupported hub.mode: {mode}")));
    }
    handle_publish(&state, &form).await
}

async fn subscribe_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), Error> {
    let form = parse_form(&body);
    handle_subscribe_form(&state, &form).await
}

async fn handle_publish(
    state: &AppState,
    form: &HashMap<String, Vec<String>>,
) -> Result<(StatusCode, &'static str), Error> {
    let urls = form.get("hub.url").cloned().unwrap_or_default();
    if urls.is_empty() {
        return Err(Error::Validation("at least one hub.url is required".into()));
    }

    let now = state.clock.now();
    for raw in &urls {
        let url = validate_url(raw, state.config.dev_mode)?;
        let topic = url.as_str();
        if state.store.is_known_feed(topic).await? {
            state.store.insert_feed_to_fetch(topic, now).await?;
        }
    }

    Ok((StatusCode::NO_CONTENT, ""))
}

async fn handle_subscribe_form(
    state: &AppState,
    form: &HashMap<String, Vec<String>>,
) -> Result<(StatusCode, &'static str), Error> {
    let mode = single(form, "hub.mode")?;
    let callback_raw = single(form, "hub.callback")?;
    let topic_raw = single(form, "hub.topic")?;
    let verify_token = validate_verify_token(single(form, "hub.verify_token")?)?;
    let verify_mode = parse_verify_mode(single(form, "hub.verify")?)?;

    let callback = validate_url(callback_raw, state.config.dev_mode)?;
    let topic = validate_url(topic_raw, state.config.dev_mode)?;
    let now = state.clock.now();

    match mode {
        "subscribe" => {
            subscribe_request(state, callback.as_str(), topic.as_str(), verify_token, verify_mode, now).await
        }
        "unsubscribe" => {
            unsubscribe_request(state, callback.as_str(), topic.as_str(), verify_token, verify_mode, now).await
        }
        other => Err(Error::Validation(format!("unsupported hub.mode: {other}"))),
    }
}

async fn subscribe_request(
    state: &AppState,
    callback: &str,
    topic: &str,
    verify_token: &str,
    verify_mode: VerifyMode,
    now: i64,
) -> Result<(StatusCode, &'static str), Error> {
    match verify_mode {
        VerifyMode::Sync => {
            let ok = verify_handshake(&state.outbound.verify, callback, "subscribe", topic, verify_token).await;
            if !ok {
                return Err(Error::HandshakeRejected);
            }
            state
                .store
                .insert_verified(
                    callback,
                    topic,
                    verify_token,
                    now,
                    state.config.subscription.expiration_seconds,
                )
                .await?;
            state.store.insert_known_feed(topic).await?;
            Ok((StatusCode::NO_CONTENT, ""))
        }
        VerifyMode::Async => {
            state
                .store
                .request_insert(
                    callback,
                    topic,
                    verify_token,
                    now,
                    state.config.subscription.expiration_seconds,
                )
                .await?;
            Ok((StatusCode::ACCEPTED, ""))
        }
    }
}

async fn unsubscribe_request(
    state: &AppState,
    callback: &str,
    topic: &str,
    verify_token: &str,
    verify_mode: VerifyMode,
    now: i64,
) -> Result<(StatusCode, &'static str), Error> {
    match verify_mode {
        VerifyMode::Sync => {
            let ok = verify_handshake(&state.outbound.verify, callback, "unsubscribe", topic, verify_token).await;
            if !ok {
                return Err(Error::HandshakeRejected);
            }
            state.store.remove_sync(callback, topic).await?;
            Ok((StatusCode::NO_CONTENT, ""))
        }
        VerifyMode::Async => {
            let existed = state.store.request_remove(callback, topic, verify_token, now).await?;
            if existed {
                Ok((StatusCode::ACCEPTED, ""))
            } else {
                Ok((StatusCode::NO_CONTENT, ""))
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authorization for `/work/*`: permitted iff the operator-cron marker
/// header matches the configured secret, or the hub is running in dev mode.
/// There's no separate "authenticated administrator" path -- operators run
/// these endpoints from trusted infrastructure, not a browser session.
fn require_operator(state: &AppState, headers: &HeaderMap) -> Result<(), Error> {
    if state.config.dev_mode {
        return Ok(());
    }
    let Some(secret) = &state.config.operator_secret else {
        return Err(Error::Unauthorized);
    };
    let provided = headers
        .get("X-Hub-Operator-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

fn work_response(did_work: bool) -> &'static str {
    if did_work {
        "processed\n"
    } else {
        "idle\n"
    }
}

async fn work_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, Error> {
    require_operator(&state, &headers)?;
    let did_work = crate::workers::confirm::run_once(&state).await?;
    Ok(work_response(did_work))
}

async fn work_pull_feeds(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, Error> {
    require_operator(&state, &headers)?;
    let did_work = crate::workers::pull::run_once(&state).await?;
    Ok(work_response(did_work))
}

async fn work_push_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, Error> {
    require_operator(&state, &headers)?;
    let did_work = crate::workers::push::run_once(&state).await?;
    Ok(work_response(did_work))
}

async fn work_poll_bootstrap(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, Error> {
    require_operator(&state, &headers)?;
    let did_work = crate::workers::bootstrap::run_once(&state).await?;
    Ok(work_response(did_work))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_bytes() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secrex"));
    }
}
