//! The `query-and-own` lease dispatcher.
//!
//! A memcache-style advisory lock shared across a worker fleet is modeled
//! here as a single in-process `Mutex<HashMap<key, expiry>>` lock table --
//! the single-process stand-in for what would be a distributed lock service
//! at larger scale. Kept as an explicit `Arc<LeaseTable>` collaborator rather
//! than a module-scope static so each test run gets its own isolated table.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Advisory, self-expiring lock table shared by every worker kind.
#[derive(Debug, Default)]
pub struct LeaseTable {
    locks: Mutex<HashMap<String, Instant>>,
}

impl LeaseTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempt to set a lock for each key with the given TTL. Returns the
    /// subset of keys this call successfully locked (a key already locked by
    /// someone else, and not yet expired, is excluded).
    fn try_lock_many(&self, candidate_keys: &[String], ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut locks = self.locks.lock().expect("lease lock table poisoned");
        locks.retain(|_, expiry| *expiry > now);

        let mut locked = Vec::with_capacity(candidate_keys.len());
        for key in candidate_keys {
            if !locks.contains_key(key) {
                locks.insert(key.clone(), now + ttl);
                locked.push(key.clone());
            }
        }
        locked
    }

    /// Best-effort release; failures (key already expired/absent) are fine —
    /// the lock is advisory and correctness never depends on this call.
    pub fn release(&self, key: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(key);
        }
    }
}

/// One candidate unit of work: its lease key plus the entity payload to
/// return if the caller ends up owning it.
pub struct Candidate<T> {
    pub key: String,
    pub entity: T,
}

/// Claim up to `work_count` entities via a sample-then-lock algorithm: pull
/// a wider batch of ready candidates than is needed, shuffle, then try to
/// lock a bounded prefix. This spreads contention across a worker fleet
/// instead of every worker racing to lock the same oldest-due row.
///
/// `fetch_candidates(sample_size)` performs the priority-ordered query
/// (by `eta` or equivalent) restricted to ready items, returning at most
/// `sample_size` rows — the caller supplies this since the query shape is
/// different for every entity kind.
pub async fn query_and_own<T, F, Fut>(
    lease_table: &LeaseTable,
    lease_seconds: i64,
    work_count: usize,
    sample_ratio: usize,
    lock_ratio: usize,
    fetch_candidates: F,
) -> Vec<Candidate<T>>
where
    F: FnOnce(i64) -> Fut,
    Fut: std::future::Future<Output = Vec<Candidate<T>>>,
{
    let sample_size = (work_count * sample_ratio).max(work_count) as i64;
    let mut candidates = fetch_candidates(sample_size).await;
    if candidates.is_empty() {
        return Vec::new();
    }

    let pick_n = candidates.len().min(lock_ratio * work_count).max(1);
    candidates.shuffle(&mut rand::thread_rng());
    candidates.truncate(pick_n);

    let candidate_keys: Vec<String> = candidates.iter().map(|c| c.key.clone()).collect();
    let mut locked_keys =
        lease_table.try_lock_many(&candidate_keys, Duration::from_secs(lease_seconds.max(0) as u64));

    if locked_keys.len() > work_count {
        for surplus_key in locked_keys.split_off(work_count) {
            lease_table.release(&surplus_key);
        }
    }

    candidates
        .into_iter()
        .filter(|c| locked_keys.contains(&c.key))
        .collect()
}
