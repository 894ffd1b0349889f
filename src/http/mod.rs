mod ingress;
mod outbound;
mod server;

pub use ingress::{parse_verify_mode, validate_url, validate_verify_token, VerifyMode};
pub use outbound::{deliver, fetch_feed, verify_handshake, FeedFetchOutcome, OutboundClients};
pub use server::{build_router, AppState};
