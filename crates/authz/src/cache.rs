//! TTL-bounded granted-set cache, keyed by `org_id:caller_subject`.
//!
//! Grounded on the teacher's `TransactionManager` (`concurrency/src/manager.rs`),
//! which pairs `dashmap::DashMap` for per-key concurrency with `parking_lot`
//! for the bits that need a plain lock; generalized here from "per-branch
//! commit lock" to "per-key expiry timestamp". `None` is cached exactly like
//! `Some(set)` — a granted set of "unrestricted" is as valid a cache value as
//! any other and must survive a round trip through the cache.

use akashi_core::AgentId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry {
    value: Option<HashSet<AgentId>>,
    expires_at: Instant,
}

/// Caches [`LoadGrantedSet`](crate::LoadGrantedSet) results. Safe to share
/// across requests; entries past their TTL are treated as absent and swept
/// lazily on access plus by an explicit [`GrantedSetCache::evict_expired`]
/// call for callers that run a periodic sweep.
pub struct GrantedSetCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl GrantedSetCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn key(org_id: &str, subject: &str) -> String {
        format!("{org_id}:{subject}")
    }

    /// `None` means cache miss. `Some(None)` means "cached and unrestricted".
    /// The returned set, if any, is a defensive copy — callers may mutate it
    /// freely without corrupting the cache.
    pub fn get(&self, key: &str) -> Option<Option<HashSet<AgentId>>> {
        let entry = self.entries.get(key)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Stores a defensive copy of `value` so later mutation by the caller
    /// can't leak into the cache.
    pub fn put(&self, key: String, value: Option<HashSet<AgentId>>) {
        self.entries.insert(key, Entry { value, expires_at: Instant::now() + self.ttl });
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry whose TTL has passed. Intended to be driven by a
    /// periodic background task; `get` also self-evicts lazily, so calling
    /// this is an optimization, not a correctness requirement.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at >= now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
