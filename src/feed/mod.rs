mod differ;

pub use differ::{diff_feed, splice_entries, DiffError, DiffResult, FeedFormat};
