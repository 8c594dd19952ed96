//! Short-term scratch cache for transient turn state
//!
//! TTL-bounded key/value storage for checkpoint-style state the compute
//! service may want between calls within a turn. Absence is always a valid,
//! handled state: readers treat a miss as "no additional context", and no
//! operation here ever returns an error.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};

use mini_moka::sync::Cache;

/// Default TTL for cached research results (1 hour)
const RESEARCH_TTL_SECS: u64 = 3600;

/// Default TTL for workflow checkpoints (24 hours)
const CHECKPOINT_TTL_SECS: u64 = 86_400;

/// A cached payload with its own expiration instant
#[derive(Clone, Debug)]
struct ScratchEntry {
    payload: serde_json::Value,
    expires_at: Instant,
}

/// TTL-based cache for ephemeral scratch state
#[derive(Clone, Debug)]
pub struct ScratchCache {
    entries: Cache<String, ScratchEntry>,
}

impl ScratchCache {
    /// Create a new cache.
    ///
    /// `max_ttl_secs` is a cache-level ceiling; individual entries carry
    /// their own (shorter or equal) expiration.
    #[must_use]
    pub fn new(max_entries: u64, max_ttl_secs: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(max_ttl_secs))
                .build(),
        }
    }

    /// Store a payload under `key` for `ttl_secs` seconds
    pub fn put(&self, key: &str, value: serde_json::Value, ttl_secs: u64) {
        self.entries.insert(
            key.to_string(),
            ScratchEntry {
                payload: value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    /// Look up a payload, treating expired entries as absent
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(&key.to_string())?;
        if entry.expires_at <= Instant::now() {
            self.entries.invalidate(&key.to_string());
            return None;
        }
        Some(entry.payload)
    }

    /// Cache research results for a `(user, query)` pair
    pub fn put_research(&self, user_id: &str, query: &str, results: serde_json::Value) {
        self.put(&research_key(user_id, query), results, RESEARCH_TTL_SECS);
    }

    /// Fetch cached research results, if still fresh
    #[must_use]
    pub fn get_research(&self, user_id: &str, query: &str) -> Option<serde_json::Value> {
        self.get(&research_key(user_id, query))
    }

    /// Store a workflow checkpoint for resuming interrupted turns
    pub fn put_checkpoint(&self, workflow_id: &str, state: serde_json::Value) {
        self.put(&format!("checkpoint:{workflow_id}"), state, CHECKPOINT_TTL_SECS);
    }

    /// Fetch a workflow checkpoint
    #[must_use]
    pub fn get_checkpoint(&self, workflow_id: &str) -> Option<serde_json::Value> {
        self.get(&format!("checkpoint:{workflow_id}"))
    }
}

impl Default for ScratchCache {
    fn default() -> Self {
        Self::new(4096, CHECKPOINT_TTL_SECS)
    }
}

/// Cache key for research results, hashed so long queries stay bounded
fn research_key(user_id: &str, query: &str) -> String {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    query.hash(&mut hasher);
    format!("research:{:016x}", hasher.finish())
}
