//! Named buckets shared between tails, with eviction of drained ones.

use super::LeakyBucket;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Named leaky buckets behind a single mutex.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: Mutex<HashMap<String, Arc<LeakyBucket>>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, bucket: Arc<LeakyBucket>) {
        self.lock().insert(name.into(), bucket);
    }

    /// Returns `None` on a miss, including for buckets evicted by
    /// [`BucketStore::garbage_collect`].
    pub fn get(&self, name: &str) -> Option<Arc<LeakyBucket>> {
        self.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict buckets that have fully drained, i.e. are back at their whole
    /// capacity. Returns how many were removed.
    pub fn garbage_collect(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.drained_at() > now);
        before - buckets.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<LeakyBucket>>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
