//! Shared scaffolding for integration tests: a scratch SQLite store and an
//! `AppState` wired to a `FixedClock` so backoff/lease math is pinned.

use hubbub::clock::{FixedClock, SharedClock};
use hubbub::config::Config;
use hubbub::http::{AppState, OutboundClients};
use hubbub::lease::LeaseTable;
use hubbub::store::Store;
use std::sync::Arc;

pub async fn test_store() -> Store {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hub.db");
    let path_str = path.to_str().expect("utf8 path").to_string();
    // Leak the tempdir so its file survives for the lifetime of the test
    // process; the OS reclaims it on exit.
    std::mem::forget(dir);
    Store::open(&path_str).await.expect("store opens")
}

pub fn test_state(store: Store, clock: FixedClock) -> AppState {
    // Integration tests point topics/callbacks at wiremock servers bound to
    // 127.0.0.1, which `validate_url`'s SSRF guard rejects outside dev mode.
    // Ingress validation itself is exercised separately in
    // `http::ingress`'s own unit tests.
    let mut config = Config::default();
    config.dev_mode = true;
    test_state_with_config(store, clock, config)
}

pub fn test_state_with_config(store: Store, clock: FixedClock, config: Config) -> AppState {
    let shared_clock: SharedClock = Arc::new(clock);
    AppState {
        store: Arc::new(store),
        lease_table: LeaseTable::new(),
        config: Arc::new(config),
        clock: shared_clock,
        outbound: OutboundClients::new(),
    }
}
