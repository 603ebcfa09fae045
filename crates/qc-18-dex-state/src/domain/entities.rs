//! # Domain Entities for DEX Order Book State
//!
//! Core data structures stored in the order book tries.
//!
//! ## Type Decisions
//!
//! - `Price`, `OrderId`, `Volume` are `U256`. A 32-byte trie key carries the
//!   full range, and the big-endian encoding sorts the same way the numbers do.
//! - Book ids are 32-byte hashes of the trading pair.
//!
//! ## Nesting
//!
//! ```text
//! state trie:   BookId ──→ ExchangeObject { nonce, asks_root, bids_root }
//! side trie:    Price  ──→ PriceLevel { volume, queue_root }
//! queue trie:   OrderId ─→ Volume
//! ```

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

pub type Hash = [u8; 32];
pub type Address = [u8; 20];
pub type Price = U256;
pub type OrderId = U256;
pub type Volume = U256;

/// Keccak256 hash of an empty RLP-encoded trie.
/// Value: keccak256(RLP("")) = 0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421
pub const EMPTY_TRIE_ROOT: Hash = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

/// Width of every semantic key once encoded for the trie.
pub const KEY_LEN: usize = 32;

/// Identifier of one order book (trading pair).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookId(pub Hash);

impl BookId {
    /// Canonical id of a trading pair: keccak256(base || quote).
    pub fn from_pair(base: &Address, quote: &Address) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(base);
        hasher.update(quote);
        BookId(hasher.finalize().into())
    }

    /// Id derived from a symbolic name such as `"TOMO/USDT"`.
    pub fn from_name(name: &str) -> Self {
        BookId(Keccak256::digest(name.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl From<Hash> for BookId {
    fn from(hash: Hash) -> Self {
        BookId(hash)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BookId({self})")
    }
}

/// Side of the book an order rests on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ask,
    Bid,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ask => f.write_str("ask"),
            Side::Bid => f.write_str("bid"),
        }
    }
}

/// Value stored under a price in a side trie.
///
/// `volume` is the sum of every order volume in the queue rooted at
/// `queue_root`. A level whose volume reaches zero is deleted, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceLevel {
    /// Aggregate resting volume at this price.
    pub volume: Volume,
    /// Root of the order queue trie for this price.
    pub queue_root: Hash,
}

impl PriceLevel {
    pub fn new(volume: Volume, queue_root: Hash) -> Self {
        Self { volume, queue_root }
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self {
            volume: U256::zero(),
            queue_root: EMPTY_TRIE_ROOT,
        }
    }
}

/// Value stored under a book id in the state trie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeObject {
    /// Per-book nonce, bumped by the execution layer.
    pub nonce: u64,
    /// Root of the ask side trie.
    pub asks_root: Hash,
    /// Root of the bid side trie.
    pub bids_root: Hash,
}

impl Default for ExchangeObject {
    fn default() -> Self {
        Self {
            nonce: 0,
            asks_root: EMPTY_TRIE_ROOT,
            bids_root: EMPTY_TRIE_ROOT,
        }
    }
}

impl ExchangeObject {
    pub fn side_root(&self, side: Side) -> Hash {
        match side {
            Side::Ask => self.asks_root,
            Side::Bid => self.bids_root,
        }
    }

    pub fn set_side_root(&mut self, side: Side, root: Hash) {
        match side {
            Side::Ask => self.asks_root = root,
            Side::Bid => self.bids_root = root,
        }
    }
}

/// Signed change applied to a resting order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeDelta {
    /// Add volume (inserts the order if absent).
    Increase(Volume),
    /// Remove volume. Draining to zero or below deletes the order.
    Decrease(Volume),
}

impl VolumeDelta {
    /// Unsigned size of the change.
    pub fn amount(&self) -> Volume {
        match *self {
            VolumeDelta::Increase(v) | VolumeDelta::Decrease(v) => v,
        }
    }
}

/// How semantic keys map onto trie paths.
///
/// Fixed for a whole state database; the two schemes are never mixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// Path is the big-endian key itself. Extremes are a single descent.
    #[default]
    Ordered,
    /// Path is keccak256(key). Order is recovered through the preimage registry.
    Secure,
}

/// Encode a `U256` as the 32-byte big-endian semantic key.
pub fn u256_to_key(value: &U256) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    value.to_big_endian(&mut out);
    out
}

/// Decode a 32-byte (or shorter, left-padded) big-endian key.
pub fn key_to_u256(key: &[u8]) -> U256 {
    U256::from_big_endian(key)
}
