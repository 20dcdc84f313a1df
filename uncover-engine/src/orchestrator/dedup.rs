//! Bounded "recently seen" filter for output lines and results.
//!
//! Fingerprints are BLAKE3 digests: of the exact line for plain text, of
//! `ip:port` for structured results. The backing [`moka`] cache evicts the
//! least recently used fingerprint once full, so an old duplicate can
//! reappear after eviction.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::types::SearchResult;

/// Default number of fingerprints remembered.
pub const DEFAULT_CAPACITY: u64 = 2048;

/// 32-byte BLAKE3 digest identifying one output record.
pub type Fingerprint = [u8; 32];

/// LRU set of fingerprints.
#[derive(Clone)]
pub struct DedupCache {
    seen: Cache<Fingerprint, ()>,
}

impl DedupCache {
    /// Create a cache remembering up to `capacity` fingerprints.
    pub fn new(capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { seen }
    }

    /// Fingerprint of an exact output line.
    pub fn line_fingerprint(line: &str) -> Fingerprint {
        *blake3::hash(line.as_bytes()).as_bytes()
    }

    /// Fingerprint of `line` as routed to the sink called `sink`.
    pub fn routed_fingerprint(sink: &str, line: &str) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(sink.as_bytes());
        hasher.update(&[0]);
        hasher.update(line.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Fingerprint of a result's `ip:port`.
    pub fn result_fingerprint(result: &SearchResult) -> Fingerprint {
        Self::line_fingerprint(&result.ip_port())
    }

    /// Record `fingerprint`. Returns `true` if it was not already present.
    pub fn insert_new(&self, fingerprint: Fingerprint) -> bool {
        self.seen.entry(fingerprint).or_insert(()).is_fresh()
    }

    /// Whether `fingerprint` is currently remembered.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains_key(fingerprint)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}
