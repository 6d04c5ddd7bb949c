use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use super::Store;
use crate::core::bucket::{BucketConfig, Decision, TokenBucket};
use crate::core::Error;

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

/// In-process store with one lazily created [`TokenBucket`] per key
///
/// The registry lock protects only the map itself. Each bucket carries
/// its own lock for the admission arithmetic, so a cold-key insertion
/// never serializes admissions on unrelated hot keys.
///
/// # Example
///
/// ```
/// use floodgate::{BucketConfig, MemoryStore, Store};
///
/// let store = MemoryStore::new();
/// let cfg = BucketConfig::new(10, 10);
///
/// let decision = store.allow("user:1", &cfg)?;
/// assert!(decision.allowed);
/// # Ok::<(), floodgate::Error>(())
/// ```
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        MemoryStore {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store pre-sized for the expected number of keys
    pub fn with_capacity(capacity: usize) -> Self {
        MemoryStore {
            buckets: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.buckets.lock().contains_key(key)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn allow(&self, key: &str, cfg: &BucketConfig) -> Result<Decision, Error> {
        // Clone the bucket handle out so the registry lock is not held
        // across the admission arithmetic.
        let bucket = {
            let mut buckets = self.buckets.lock();
            match buckets.get(key) {
                Some(bucket) => Arc::clone(bucket),
                None => {
                    let bucket = Arc::new(TokenBucket::from_config(*cfg)?);
                    buckets.insert(key.to_string(), Arc::clone(&bucket));
                    bucket
                }
            }
        };

        Ok(bucket.admit())
    }

    fn delete_inactive(&self, cutoff: Instant) -> Result<(), Error> {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_seen() >= cutoff);

        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.len(), "evicted idle buckets");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
