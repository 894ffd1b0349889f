//! Deterministic key derivation: sha1-of-value hex.
//!
//! Every entity key is a hash of the domain value it identifies rather than
//! an opaque counter, so two requests describing the same subscription,
//! feed, or entry always collapse onto the same row without a prior lookup.

use sha1::{Digest, Sha1};

fn sha1_hex(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    hex::encode(digest)
}

/// Key for a `Subscription`: hash(callback ⊕ topic).
pub fn subscription_key(callback: &str, topic: &str) -> String {
    sha1_hex(&format!("{callback}\0{topic}"))
}

/// Key for `FeedToFetch`, `KnownFeed`, and `FeedRecord`: hash(topic).
pub fn topic_key(topic: &str) -> String {
    sha1_hex(topic)
}

/// Key for a `FeedEntryRecord`: hash(entry_id).
pub fn entry_key(entry_id: &str) -> String {
    sha1_hex(entry_id)
}

/// sha1 of raw entry XML, used as `entry_content_hash`.
pub fn content_hash(raw_entry_xml: &str) -> String {
    sha1_hex(raw_entry_xml)
}
