//! Outbound HTTP collaborators: the verification handshake GET, delivery
//! POST, and feed fetch GET.
//!
//! Each builds one shared `reqwest::Client` up front and reuses it across
//! concurrent requests rather than constructing a client per call, so
//! connection pooling actually pools.

use reqwest::{Client, StatusCode};
use std::time::Duration;

#[derive(Clone)]
pub struct OutboundClients {
    /// No redirects: the verification handshake must hit the declared
    /// callback exactly.
    pub verify: Client,
    pub delivery: Client,
    pub feed: Client,
}

impl OutboundClients {
    pub fn new() -> Self {
        Self {
            verify: Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(Duration::from_secs(15))
                .build()
                .expect("verify client builds"),
            delivery: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("delivery client builds"),
            feed: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("feed client builds"),
        }
    }
}

impl Default for OutboundClients {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs the verification handshake GET. Returns true iff the response
/// status is 204.
pub async fn verify_handshake(
    client: &Client,
    callback: &str,
    mode: &str,
    topic: &str,
    verify_token: &str,
) -> bool {
    let response = client
        .get(callback)
        .query(&[
            ("hub.mode", mode),
            ("hub.topic", topic),
            ("hub.verify_token", verify_token),
        ])
        .send()
        .await;

    matches!(response, Ok(r) if r.status() == StatusCode::NO_CONTENT)
}

/// Delivers `payload` to `callback`. Returns true iff the subscriber
/// responded with 200 or 204 and no transport error occurred.
pub async fn deliver(client: &Client, callback: &str, payload: &str) -> bool {
    let response = client
        .post(callback)
        .header("Content-Type", "application/atom+xml")
        .body(payload.to_string())
        .send()
        .await;

    matches!(
        response,
        Ok(r) if r.status() == StatusCode::OK || r.status() == StatusCode::NO_CONTENT
    )
}

#[derive(Debug)]
pub struct FeedFetchOutcome {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// Fetches `topic`, following redirects, with conditional headers from the
/// stored `FeedRecord` when present, so an unchanged feed costs the
/// publisher a 304 instead of a full body transfer.
pub async fn fetch_feed(
    client: &Client,
    topic: &str,
    last_modified: Option<&str>,
    etag: Option<&str>,
) -> reqwest::Result<FeedFetchOutcome> {
    let mut request = client.get(topic);
    if let Some(value) = last_modified {
        request = request.header("If-Modified-Since", value);
    }
    if let Some(value) = etag {
        request = request.header("If-None-Match", value);
    }

    let response = request.send().await?;
    let status = response.status();
    let content_type = header_value(&response, "content-type");
    let new_last_modified = header_value(&response, "last-modified");
    let new_etag = header_value(&response, "etag");
    let body = response.bytes().await?.to_vec();

    Ok(FeedFetchOutcome {
        status,
        body,
        content_type,
        last_modified: new_last_modified,
        etag: new_etag,
    })
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
