mod event;
mod feed;
mod keys;
mod polling_marker;
mod schema;
mod subscription;

pub use event::{DeliveryMode, EventToDeliver};
pub use feed::{FeedEntryRecord, FeedRecord, FeedToFetch};
pub use keys::{content_hash, entry_key, subscription_key, topic_key};
pub use polling_marker::PollingMarker;
pub use schema::{Store, StoreError};
pub use subscription::{Subscription, SubscriptionState};
