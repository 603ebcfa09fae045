pub mod cached_db;
pub mod memory_db;

pub use cached_db::CachedTrieDb;
pub use memory_db::{InMemoryCheckpointStorage, InMemoryTrieDb};
