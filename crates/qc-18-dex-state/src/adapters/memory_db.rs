use crate::domain::{Hash, TrieError};
use crate::ports::{CheckpointStorage, TrieDatabase};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// In-memory implementation of TrieDatabase for testing
pub struct InMemoryTrieDb {
    nodes: RwLock<HashMap<Hash, Vec<u8>>>,
    preimages: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl InMemoryTrieDb {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            preimages: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored trie nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl Default for InMemoryTrieDb {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieDatabase for InMemoryTrieDb {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn put_node(&self, hash: Hash, data: Vec<u8>) -> Result<(), TrieError> {
        self.nodes.write().insert(hash, data);
        Ok(())
    }

    fn batch_put(&self, batch: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
        let mut nodes = self.nodes.write();
        for (hash, data) in batch {
            nodes.insert(hash, data);
        }
        Ok(())
    }

    fn delete_node(&self, hash: &Hash) -> Result<(), TrieError> {
        self.nodes.write().remove(hash);
        Ok(())
    }

    fn get_preimage(&self, key: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self.preimages.read().get(key).cloned())
    }

    fn put_preimages(&self, batch: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError> {
        self.preimages.write().extend(batch);
        Ok(())
    }
}

/// In-memory implementation of CheckpointStorage for testing
pub struct InMemoryCheckpointStorage {
    checkpoints: RwLock<BTreeMap<u64, Hash>>,
    floor: RwLock<u64>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(BTreeMap::new()),
            floor: RwLock::new(0),
        }
    }
}

impl Default for InMemoryCheckpointStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn record_checkpoint(&self, height: u64, root: Hash) -> Result<(), TrieError> {
        self.checkpoints.write().insert(height, root);
        Ok(())
    }

    fn get_nearest_checkpoint(&self, height: u64) -> Result<Option<(u64, Hash)>, TrieError> {
        // Nearest checkpoint at or before the given height
        Ok(self
            .checkpoints
            .read()
            .range(..=height)
            .next_back()
            .map(|(h, root)| (*h, *root)))
    }

    fn latest_checkpoint(&self) -> Result<Option<(u64, Hash)>, TrieError> {
        Ok(self
            .checkpoints
            .read()
            .iter()
            .next_back()
            .map(|(h, root)| (*h, *root)))
    }

    fn prune_checkpoints(&self, keep_after: u64) -> Result<u64, TrieError> {
        let mut checkpoints = self.checkpoints.write();
        // The checkpoint covering keep_after anchors the retained range.
        let Some(anchor) = checkpoints.range(..=keep_after).next_back().map(|(h, _)| *h) else {
            return Ok(0);
        };
        let retained = checkpoints.split_off(&anchor);
        let pruned = checkpoints.len() as u64;
        *checkpoints = retained;
        if pruned > 0 {
            let mut floor = self.floor.write();
            *floor = (*floor).max(anchor);
        }
        Ok(pruned)
    }

    fn pruned_below(&self) -> Result<u64, TrieError> {
        Ok(*self.floor.read())
    }
}
