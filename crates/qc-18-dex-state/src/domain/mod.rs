pub mod codec;
pub mod config;
pub mod entities;
pub mod errors;
pub mod exchange;
pub mod nibbles;
pub mod node;
pub mod order_queue;
pub mod ordered;
pub mod preimage;
pub mod price_level;
pub mod snapshot;
pub mod trie;

pub use codec::keccak256;
pub use config::*;
pub use entities::*;
pub use errors::*;
pub use exchange::*;
pub use order_queue::OrderQueue;
pub use ordered::{OrderedIter, OrderedTrie, TrieContext};
pub use preimage::KeyPreimageRegistry;
pub use price_level::PriceLevelBook;
pub use snapshot::*;
pub use trie::{MerkleTrie, TrieEntry, TrieIter, TrieKey};
