use crate::domain::{Hash, TrieError};

/// Trie database abstraction.
///
/// Holds two columns: trie nodes keyed by node hash, and key preimages
/// keyed by the hashed trie path they produce.
pub trait TrieDatabase: Send + Sync {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError>;
    fn put_node(&self, hash: Hash, data: Vec<u8>) -> Result<(), TrieError>;
    fn batch_put(&self, nodes: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError>;
    fn delete_node(&self, hash: &Hash) -> Result<(), TrieError>;

    fn get_preimage(&self, key: &Hash) -> Result<Option<Vec<u8>>, TrieError>;
    fn put_preimages(&self, preimages: Vec<(Hash, Vec<u8>)>) -> Result<(), TrieError>;
}

/// Committed state roots by block height.
pub trait CheckpointStorage: Send + Sync {
    fn record_checkpoint(&self, height: u64, root: Hash) -> Result<(), TrieError>;
    fn get_nearest_checkpoint(&self, height: u64) -> Result<Option<(u64, Hash)>, TrieError>;
    fn latest_checkpoint(&self) -> Result<Option<(u64, Hash)>, TrieError>;

    /// Drop checkpoints not needed to resolve any height at or above
    /// `keep_after`. The nearest checkpoint at or below `keep_after` stays.
    fn prune_checkpoints(&self, keep_after: u64) -> Result<u64, TrieError>;

    /// Heights below this have lost their checkpoint. 0 until a prune removes one.
    fn pruned_below(&self) -> Result<u64, TrieError>;
}

/// Shared handle every trie of one state database holds.
pub type SharedTrieDb = std::sync::Arc<dyn TrieDatabase>;
