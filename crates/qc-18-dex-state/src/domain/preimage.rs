//! # Key Preimage Registry
//!
//! Maps a hashed trie path back to the semantic key bytes that produced it.
//!
//! Under [`KeyScheme::Secure`](super::KeyScheme) the trie path is
//! `keccak256(key)`, which cannot be inverted. Every write registers the
//! preimage here; traversal resolves through it. Entries are pending in memory
//! until `flush` persists them to the trie database alongside the nodes of the
//! same commit. Dropping the registry discards unflushed entries.

use super::{codec::keccak256, Hash, TrieError};
use crate::ports::SharedTrieDb;
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct KeyPreimageRegistry {
    pending: RwLock<HashMap<Hash, Vec<u8>>>,
    db: SharedTrieDb,
}

impl KeyPreimageRegistry {
    pub fn new(db: SharedTrieDb) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            db,
        }
    }

    /// Hash `semantic` into its storage key and remember the preimage.
    pub fn hash_and_register(&self, semantic: &[u8]) -> Hash {
        let storage_key = keccak256(semantic);
        self.register(storage_key, semantic);
        storage_key
    }

    /// Remember that `storage_key` was produced from `semantic`.
    pub fn register(&self, storage_key: Hash, semantic: &[u8]) {
        self.pending
            .write()
            .entry(storage_key)
            .or_insert_with(|| semantic.to_vec());
    }

    /// Look up the preimage of `storage_key`: pending entries first, then the database.
    pub fn resolve(&self, storage_key: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(found) = self.pending.read().get(storage_key) {
            return Ok(Some(found.clone()));
        }
        self.db.get_preimage(storage_key)
    }

    /// Like `resolve`, but a miss is an error.
    pub fn resolve_required(&self, storage_key: &Hash) -> Result<Vec<u8>, TrieError> {
        match self.resolve(storage_key)? {
            Some(preimage) => Ok(preimage),
            None => {
                tracing::warn!(
                    "[qc-18] preimage missing for trie key 0x{}",
                    hex::encode(storage_key)
                );
                Err(TrieError::MissingPreimage(*storage_key))
            }
        }
    }

    /// Persist pending preimages. Returns how many were written.
    ///
    /// The pending map stays locked until the batch is stored, so nothing
    /// registered meanwhile is dropped. On failure every entry stays pending.
    pub fn flush(&self) -> Result<usize, TrieError> {
        let mut pending = self.pending.write();
        if pending.is_empty() {
            return Ok(0);
        }
        let batch: Vec<(Hash, Vec<u8>)> = pending.iter().map(|(k, v)| (*k, v.clone())).collect();
        let written = batch.len();
        self.db.put_preimages(batch)?;
        pending.clear();
        Ok(written)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTrieDb;
    use crate::ports::TrieDatabase;
    use std::sync::Arc;

    #[test]
    fn test_register_and_resolve() {
        let registry = KeyPreimageRegistry::new(Arc::new(InMemoryTrieDb::new()));
        let key = registry.hash_and_register(b"price-100");
        assert_eq!(registry.resolve(&key).unwrap(), Some(b"price-100".to_vec()));
        assert_eq!(registry.resolve(&[0u8; 32]).unwrap(), None);
    }

    #[test]
    fn test_flush_survives_new_registry() {
        let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
        let registry = KeyPreimageRegistry::new(db.clone());
        let key = registry.hash_and_register(&[0x01; 32]);
        assert_eq!(registry.flush().unwrap(), 1);
        assert_eq!(registry.pending_len(), 0);

        let fresh = KeyPreimageRegistry::new(db);
        assert_eq!(fresh.resolve_required(&key).unwrap(), vec![0x01; 32]);
    }

    #[test]
    fn test_unflushed_entries_are_lost() {
        let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
        let key = KeyPreimageRegistry::new(db.clone()).hash_and_register(&[0x02; 32]);

        let fresh = KeyPreimageRegistry::new(db);
        assert_eq!(
            fresh.resolve_required(&key),
            Err(TrieError::MissingPreimage(key))
        );
    }

    /// Node store whose preimage column rejects writes.
    struct ReadOnlyPreimages(InMemoryTrieDb);

    impl TrieDatabase for ReadOnlyPreimages {
        fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
            self.0.get_node(hash)
        }
        fn put_node(&self, hash: Hash, data: Vec<u8>) -> Result<(), TrieError> {
            self.0.put_node(hash, data)
        }
        fn batch_put(&self, nodes: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
            self.0.batch_put(nodes)
        }
        fn delete_node(&self, hash: &Hash) -> Result<(), TrieError> {
            self.0.delete_node(hash)
        }
        fn get_preimage(&self, key: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
            self.0.get_preimage(key)
        }
        fn put_preimages(&self, _preimages: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
            Err(TrieError::Database("preimage column read-only".into()))
        }
    }

    #[test]
    fn test_failed_flush_keeps_pending() {
        let registry = KeyPreimageRegistry::new(Arc::new(ReadOnlyPreimages(InMemoryTrieDb::new())));
        let key = registry.hash_and_register(&[0x03; 32]);
        assert!(matches!(registry.flush(), Err(TrieError::Database(_))));
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.resolve_required(&key).unwrap(), vec![0x03; 32]);
    }

    #[test]
    fn test_registrations_during_flush_are_kept() {
        let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
        let registry = Arc::new(KeyPreimageRegistry::new(db.clone()));

        let writers: Vec<_> = (0u8..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0u8..50)
                        .map(|i| registry.hash_and_register(&[t, i]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for _ in 0..20 {
            registry.flush().unwrap();
        }
        let keys: Vec<Hash> = writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        registry.flush().unwrap();
        assert_eq!(registry.pending_len(), 0);

        let fresh = KeyPreimageRegistry::new(db);
        for key in keys {
            assert!(fresh.resolve_required(&key).is_ok());
        }
    }
}
