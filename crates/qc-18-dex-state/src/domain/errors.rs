//! Error types for the DEX state subsystem.

use super::{BookId, Hash, OrderId, Price};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DexStateError {
    #[error("Order book not found: {book}")]
    BookNotFound { book: BookId },

    #[error("Corrupt state in book {book}: {detail}")]
    CorruptState { book: BookId, detail: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Cannot open trie at root 0x{}", hex::encode(.root))]
    TrieOpen { root: Hash },

    #[error("Volume overflow at price {price} for order {order}")]
    VolumeOverflow { price: Price, order: OrderId },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Stale height {height}: state already at {head}")]
    StaleHeight { height: u64, head: u64 },

    #[error("Height {height} was pruned; oldest retained is {floor}")]
    Pruned { height: u64, floor: u64 },

    #[error("State trie error: {0}")]
    Trie(#[from] TrieError),
}

/// Failure below the book layer, before a book id is attached.
///
/// Trie and codec code report these; the owning book converts them into
/// [`DexStateError`] with its own id via [`TrieError::in_book`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("missing trie node 0x{}", hex::encode(.0))]
    MissingNode(Hash),

    #[error("malformed trie node: {0}")]
    MalformedNode(String),

    #[error("trie depth exceeded: max {max}")]
    DepthExceeded { max: usize },

    #[error("no preimage for key 0x{}", hex::encode(.0))]
    MissingPreimage(Hash),

    #[error("cannot decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("database: {0}")]
    Database(String),
}

impl TrieError {
    /// Attach the owning book id.
    pub fn in_book(self, book: BookId) -> DexStateError {
        match self {
            TrieError::Database(msg) => DexStateError::Database(msg),
            other => DexStateError::CorruptState {
                book,
                detail: other.to_string(),
            },
        }
    }
}

impl From<rlp::DecoderError> for TrieError {
    fn from(err: rlp::DecoderError) -> Self {
        TrieError::MalformedNode(err.to_string())
    }
}
