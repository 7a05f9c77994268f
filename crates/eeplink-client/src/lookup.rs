//! In-memory host name lookup cache
//!
//! Both clients cache successful name resolutions so a host is asked of
//! the router at most once per session. The cache is session-scoped.

use std::num::NonZeroUsize;

use lru::LruCache;

use eeplink_protocol::Destination;

/// Maximum cached resolutions per session.
pub const LOOKUP_CACHE_CAPACITY: usize = 1000;

pub struct LookupCache {
    entries: LruCache<String, Destination>,
}

impl LookupCache {
    pub fn new() -> Self {
        LookupCache {
            entries: LruCache::new(
                NonZeroUsize::new(LOOKUP_CACHE_CAPACITY).expect("nonzero capacity"),
            ),
        }
    }

    pub fn get(&mut self, name: &str) -> Option<&Destination> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: String, destination: Destination) {
        self.entries.put(name, destination);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new()
    }
}
