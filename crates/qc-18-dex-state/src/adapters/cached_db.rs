//! # Cached Trie Database
//!
//! Read-through LRU cache of trie nodes in front of a shared database.
//!
//! Nodes are content-addressed and immutable once written, so a cached node
//! never goes stale. Deleting a node evicts it.

use crate::domain::{Hash, TrieError};
use crate::ports::{SharedTrieDb, TrieDatabase};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct CachedTrieDb {
    inner: SharedTrieDb,
    cache: Mutex<LruCache<Hash, Vec<u8>>>,
}

impl CachedTrieDb {
    /// Wrap `inner` with room for `capacity` nodes (at least one).
    pub fn new(inner: SharedTrieDb, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            entries: cache.len(),
            capacity: cache.cap().get(),
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

impl TrieDatabase for CachedTrieDb {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(node) = self.cache.lock().get(hash) {
            return Ok(Some(node.clone()));
        }
        let node = self.inner.get_node(hash)?;
        if let Some(data) = &node {
            self.cache.lock().put(*hash, data.clone());
        }
        Ok(node)
    }

    fn put_node(&self, hash: Hash, data: Vec<u8>) -> Result<(), TrieError> {
        self.inner.put_node(hash, data)
    }

    fn batch_put(&self, nodes: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
        self.inner.batch_put(nodes)
    }

    fn delete_node(&self, hash: &Hash) -> Result<(), TrieError> {
        self.cache.lock().pop(hash);
        self.inner.delete_node(hash)
    }

    fn get_preimage(&self, key: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        self.inner.get_preimage(key)
    }

    fn put_preimages(&self, preimages: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
        self.inner.put_preimages(preimages)
    }
}
