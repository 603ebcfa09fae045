//! # qc-18-dex-state
//!
//! DEX Order Book State subsystem for Quantum-Chain.
//!
//! ## Role in System
//!
//! - **Authenticated Order Books**: Every book's asks and bids live in Merkle
//!   Patricia tries, so the whole exchange collapses into one state root
//! - **Price-Time Queries**: Best ask/bid are single trie descents under the
//!   ordered key scheme
//! - **Deterministic Replay**: Equal sequences of steps give equal roots
//!
//! ## Layout
//!
//! ```text
//! state trie ─── BookId ──→ ExchangeObject { nonce, asks_root, bids_root }
//!                                              │           │
//!                           ┌──────────────────┘           └──── (bids)
//!                           ↓
//! side trie ──── Price ───→ PriceLevel { volume, queue_root }
//!                                                 │
//!                           ┌─────────────────────┘
//!                           ↓
//! queue trie ─── OrderId ─→ Volume
//! ```
//!
//! ## Usage
//!
//! The matching engine drives [`DexStateService::apply_step`] (or the
//! [`DexStateApi`] shortcuts) once per state transition. Explorers and
//! RPC handlers read through the same service and only ever observe
//! committed versions.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::*;
pub use domain::*;
pub use ports::*;
pub use service::DexStateService;
