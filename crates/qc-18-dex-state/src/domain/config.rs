//! # DEX State Configuration
//!
//! Parsed from TOML or built in code. Missing fields take their defaults.

use super::{DexStateError, KeyScheme, KEY_LEN};
use serde::{Deserialize, Serialize};

/// Nibbles in a full trie path.
pub const MIN_MAX_DEPTH: usize = KEY_LEN * 2;

/// Configuration for one state database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DexStateConfig {
    /// How semantic keys map onto trie paths. Fixed for the lifetime of the database.
    pub key_scheme: KeyScheme,
    /// Maximum trie depth in nibbles. Must cover a full 32-byte path.
    pub max_depth: usize,
    /// Trie nodes kept in the read-through LRU cache. 0 disables the cache.
    pub node_cache_capacity: usize,
    /// Materialize order queues on the rayon pool when dumping a side.
    pub parallel_snapshot: bool,
    /// Heights within this distance of the head stay resolvable; older
    /// checkpoints are pruned after each step. 0 keeps every checkpoint.
    pub checkpoint_retention: u64,
}

impl Default for DexStateConfig {
    fn default() -> Self {
        Self {
            key_scheme: KeyScheme::Ordered,
            max_depth: MIN_MAX_DEPTH,
            node_cache_capacity: 4096,
            parallel_snapshot: false,
            checkpoint_retention: 0,
        }
    }
}

impl DexStateConfig {
    #[must_use]
    pub fn with_key_scheme(mut self, scheme: KeyScheme) -> Self {
        self.key_scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_parallel_snapshot(mut self, enabled: bool) -> Self {
        self.parallel_snapshot = enabled;
        self
    }

    #[must_use]
    pub fn with_node_cache_capacity(mut self, capacity: usize) -> Self {
        self.node_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_checkpoint_retention(mut self, heights: u64) -> Self {
        self.checkpoint_retention = heights;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document does not parse or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self, DexStateError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DexStateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DexStateError> {
        if self.max_depth < MIN_MAX_DEPTH {
            return Err(DexStateError::Config(format!(
                "max_depth {} cannot hold a {MIN_MAX_DEPTH}-nibble path",
                self.max_depth
            )));
        }
        Ok(())
    }
}
