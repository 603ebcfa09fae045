//! # Ordered Trie
//!
//! Typed, numerically ordered view over a [`MerkleTrie`].
//!
//! Semantic keys are `U256` values. How they reach the trie depends on the
//! [`KeyScheme`]:
//!
//! | Scheme    | Trie path            | Iteration          | Best left/right |
//! |-----------|----------------------|--------------------|-----------------|
//! | `Ordered` | big-endian key       | lazy, in path order | one descent     |
//! | `Secure`  | keccak256(key)       | resolve + sort     | full scan       |
//!
//! Either way `best_left().key <= every key <= best_right().key`.

use super::{
    codec::{decode_value, encode_value, keccak256},
    key_to_u256,
    preimage::KeyPreimageRegistry,
    trie::{MerkleTrie, TrieIter, TrieKey},
    u256_to_key, DexStateError, Hash, KeyScheme, TrieError,
};
use crate::ports::SharedTrieDb;
use primitive_types::U256;
use rlp::{Decodable, Encodable};
use std::marker::PhantomData;
use std::sync::Arc;

/// Everything needed to open a trie belonging to one state database.
#[derive(Clone)]
pub struct TrieContext {
    pub db: SharedTrieDb,
    pub scheme: KeyScheme,
    pub preimages: Arc<KeyPreimageRegistry>,
    pub max_depth: usize,
}

impl TrieContext {
    pub fn new(db: SharedTrieDb, scheme: KeyScheme, max_depth: usize) -> Self {
        Self {
            preimages: Arc::new(KeyPreimageRegistry::new(db.clone())),
            db,
            scheme,
            max_depth,
        }
    }

    /// Open an ordered trie at `root`.
    pub fn open<V>(&self, root: Hash, what: &'static str) -> Result<OrderedTrie<V>, DexStateError> {
        let trie = MerkleTrie::open(root, self.db.clone(), self.max_depth)?;
        Ok(OrderedTrie {
            trie,
            scheme: self.scheme,
            preimages: self.preimages.clone(),
            what,
            _value: PhantomData,
        })
    }
}

/// Authenticated mapping from `U256` keys to RLP-encoded `V` values.
pub struct OrderedTrie<V> {
    trie: MerkleTrie,
    scheme: KeyScheme,
    preimages: Arc<KeyPreimageRegistry>,
    /// Human label for decode errors ("price level", "order volume", ...).
    what: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V: Encodable + Decodable> OrderedTrie<V> {
    /// Trie path for `key`, without touching the registry.
    fn path_of(&self, key: &U256) -> TrieKey {
        let semantic = u256_to_key(key);
        match self.scheme {
            KeyScheme::Ordered => semantic,
            KeyScheme::Secure => keccak256(&semantic),
        }
    }

    /// Trie path for a key about to be written; registers its preimage.
    fn storage_key(&self, key: &U256) -> TrieKey {
        let semantic = u256_to_key(key);
        match self.scheme {
            KeyScheme::Ordered => semantic,
            KeyScheme::Secure => self.preimages.hash_and_register(&semantic),
        }
    }

    fn semantic_key(&self, storage: &TrieKey) -> Result<U256, TrieError> {
        match self.scheme {
            KeyScheme::Ordered => Ok(key_to_u256(storage)),
            KeyScheme::Secure => {
                let preimage = self.preimages.resolve_required(storage)?;
                if preimage.len() > 32 {
                    return Err(TrieError::Decode {
                        what: format!("{} key", self.what),
                        reason: format!("preimage of {} bytes", preimage.len()),
                    });
                }
                Ok(key_to_u256(&preimage))
            }
        }
    }

    fn decode(&self, key: &U256, bytes: &[u8]) -> Result<V, TrieError> {
        decode_value(bytes, format!("{} at key {}", self.what, key))
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &U256) -> Result<Option<V>, TrieError> {
        let path = self.path_of(key);
        self.trie
            .get(&path)?
            .map(|bytes| self.decode(key, &bytes))
            .transpose()
    }

    /// Insert or overwrite.
    pub fn update(&mut self, key: &U256, value: &V) -> Result<(), TrieError> {
        let path = self.storage_key(key);
        self.trie.insert(&path, encode_value(value))
    }

    /// Remove `key`; absent keys are a no-op. Returns whether anything was removed.
    pub fn delete(&mut self, key: &U256) -> Result<bool, TrieError> {
        let path = self.path_of(key);
        self.trie.remove(&path)
    }

    /// Entries in ascending key order.
    ///
    /// Each call starts a fresh traversal of the current content.
    pub fn iter(&self) -> OrderedIter<'_, V> {
        let inner = match self.scheme {
            KeyScheme::Ordered => IterInner::Path(self.trie.iter()),
            KeyScheme::Secure => match self.sorted_entries() {
                Ok(entries) => IterInner::Sorted(entries.into_iter()),
                Err(e) => IterInner::Failed(Some(e)),
            },
        };
        OrderedIter { owner: self, inner }
    }

    fn sorted_entries(&self) -> Result<Vec<(U256, Vec<u8>)>, TrieError> {
        let mut entries = self
            .trie
            .iter()
            .map(|entry| {
                let (path, bytes) = entry?;
                Ok((self.semantic_key(&path)?, bytes))
            })
            .collect::<Result<Vec<_>, TrieError>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Entry with the smallest key.
    pub fn best_left(&self) -> Result<Option<(U256, V)>, TrieError> {
        match self.scheme {
            KeyScheme::Ordered => self.decode_entry(self.trie.leftmost()?),
            KeyScheme::Secure => self.scan_extreme(|candidate, best| candidate < best),
        }
    }

    /// Entry with the largest key.
    pub fn best_right(&self) -> Result<Option<(U256, V)>, TrieError> {
        match self.scheme {
            KeyScheme::Ordered => self.decode_entry(self.trie.rightmost()?),
            KeyScheme::Secure => self.scan_extreme(|candidate, best| candidate > best),
        }
    }

    fn decode_entry(&self, entry: Option<(TrieKey, Vec<u8>)>) -> Result<Option<(U256, V)>, TrieError> {
        match entry {
            None => Ok(None),
            Some((path, bytes)) => {
                let key = self.semantic_key(&path)?;
                Ok(Some((key, self.decode(&key, &bytes)?)))
            }
        }
    }

    fn scan_extreme(
        &self,
        better: impl Fn(&U256, &U256) -> bool,
    ) -> Result<Option<(U256, V)>, TrieError> {
        let mut best: Option<(U256, Vec<u8>)> = None;
        for entry in self.trie.iter() {
            let (path, bytes) = entry?;
            let key = self.semantic_key(&path)?;
            if best.as_ref().map_or(true, |(b, _)| better(&key, b)) {
                best = Some((key, bytes));
            }
        }
        best.map(|(key, bytes)| Ok((key, self.decode(&key, &bytes)?)))
            .transpose()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn root_hash(&self) -> Hash {
        self.trie.root_hash()
    }

    /// Persist nodes and return the root.
    pub fn commit(&mut self) -> Result<Hash, TrieError> {
        self.trie.commit()
    }
}

enum IterInner<'a> {
    Path(TrieIter<'a>),
    Sorted(std::vec::IntoIter<(U256, Vec<u8>)>),
    Failed(Option<TrieError>),
}

/// Iterator returned by [`OrderedTrie::iter`].
pub struct OrderedIter<'a, V> {
    owner: &'a OrderedTrie<V>,
    inner: IterInner<'a>,
}

impl<'a, V: Encodable + Decodable> Iterator for OrderedIter<'a, V> {
    type Item = Result<(U256, V), TrieError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, bytes) = match &mut self.inner {
            IterInner::Path(it) => match it.next()? {
                Ok((path, bytes)) => (key_to_u256(&path), bytes),
                Err(e) => return Some(Err(e)),
            },
            IterInner::Sorted(it) => it.next()?,
            IterInner::Failed(err) => return err.take().map(Err),
        };
        Some(self.owner.decode(&key, &bytes).map(|value| (key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTrieDb;
    use crate::domain::EMPTY_TRIE_ROOT;

    fn ctx(scheme: KeyScheme) -> TrieContext {
        TrieContext::new(Arc::new(InMemoryTrieDb::new()), scheme, 64)
    }

    fn fill(trie: &mut OrderedTrie<U256>, keys: &[u64]) {
        for k in keys {
            trie.update(&U256::from(*k), &U256::from(k * 10)).unwrap();
        }
    }

    #[test]
    fn test_extremes_both_schemes() {
        for scheme in [KeyScheme::Ordered, KeyScheme::Secure] {
            let mut trie = ctx(scheme).open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
            assert!(trie.best_left().unwrap().is_none());
            assert!(trie.best_right().unwrap().is_none());

            fill(&mut trie, &[100, 90, 4_000, 7]);
            assert_eq!(trie.best_left().unwrap().unwrap().0, U256::from(7u64));
            assert_eq!(trie.best_right().unwrap().unwrap(), (U256::from(4_000u64), U256::from(40_000u64)));
        }
    }

    #[test]
    fn test_iteration_sorted_both_schemes() {
        for scheme in [KeyScheme::Ordered, KeyScheme::Secure] {
            let mut trie = ctx(scheme).open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
            fill(&mut trie, &[5, 300, 1, 42]);
            let keys: Vec<u64> = trie.iter().map(|e| e.unwrap().0.as_u64()).collect();
            assert_eq!(keys, vec![1, 5, 42, 300]);

            // Restartable: a second pass sees the same content.
            assert_eq!(trie.iter().count(), 4);
        }
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut trie = ctx(KeyScheme::Ordered).open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
        fill(&mut trie, &[1]);
        assert!(!trie.delete(&U256::from(2u64)).unwrap());
        assert!(trie.delete(&U256::from(1u64)).unwrap());
        assert!(trie.is_empty());
    }

    #[test]
    fn test_secure_scheme_needs_preimages() {
        let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
        let writer = TrieContext::new(db.clone(), KeyScheme::Secure, 64);
        let mut trie = writer.open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
        fill(&mut trie, &[1, 2]);
        let root = trie.commit().unwrap();

        // Fresh context without flushed preimages cannot order the keys.
        let reader = TrieContext::new(db.clone(), KeyScheme::Secure, 64);
        let reopened = reader.open::<U256>(root, "volume").unwrap();
        assert_eq!(reopened.get(&U256::from(1u64)).unwrap(), Some(U256::from(10u64)));
        assert!(matches!(
            reopened.best_left(),
            Err(TrieError::MissingPreimage(_))
        ));
        assert!(reopened.iter().next().unwrap().is_err());

        writer.preimages.flush().unwrap();
        assert_eq!(reopened.best_left().unwrap().unwrap().0, U256::from(1u64));
    }

    #[test]
    fn test_secure_and_ordered_roots_differ() {
        let mut a = ctx(KeyScheme::Ordered).open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
        let mut b = ctx(KeyScheme::Secure).open::<U256>(EMPTY_TRIE_ROOT, "volume").unwrap();
        fill(&mut a, &[1]);
        fill(&mut b, &[1]);
        assert_ne!(a.root_hash(), b.root_hash());
    }
}
