//! # Versioned DEX State Service
//!
//! Shareable front of the state database. Readers only ever see committed
//! versions; writers run one step at a time against a private working copy.
//!
//! ## Step Lifecycle
//!
//! ```text
//! lock writer ─→ open working DexState at head ─→ run step ─→ commit
//!      ─→ record checkpoint ─→ publish new head
//! ```
//!
//! A step that fails anywhere before publication is dropped together with
//! its working state, including unflushed key preimages. The published head
//! never moves on failure.
//!
//! ## Thread Safety
//!
//! The head is behind an RwLock, so any number of readers can open the
//! committed version concurrently. A separate mutex serializes writers.

use crate::adapters::{CachedTrieDb, InMemoryCheckpointStorage, InMemoryTrieDb};
use crate::domain::{
    BookId, BookSnapshot, DexState, DexStateConfig, DexStateError, Hash, OrderId, Price, Side,
    Volume, EMPTY_TRIE_ROOT,
};
use crate::ports::{CheckpointStorage, DexStateApi, SharedTrieDb};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Head {
    height: u64,
    root: Hash,
}

pub struct DexStateService {
    db: SharedTrieDb,
    checkpoints: Arc<dyn CheckpointStorage>,
    config: DexStateConfig,
    head: RwLock<Head>,
    writer: Mutex<()>,
}

impl DexStateService {
    /// Resume from the latest checkpoint in `checkpoints`, or start empty.
    ///
    /// # Errors
    ///
    /// `Config` on an invalid configuration, `TrieOpen` if the latest
    /// checkpoint names a root the database does not hold.
    pub fn new(
        db: SharedTrieDb,
        checkpoints: Arc<dyn CheckpointStorage>,
        config: DexStateConfig,
    ) -> Result<Self, DexStateError> {
        config.validate()?;
        let db: SharedTrieDb = if config.node_cache_capacity > 0 {
            Arc::new(CachedTrieDb::new(db, config.node_cache_capacity))
        } else {
            db
        };

        let head = match checkpoints.latest_checkpoint()? {
            Some((height, root)) => Head { height, root },
            None => Head {
                height: 0,
                root: EMPTY_TRIE_ROOT,
            },
        };
        DexState::open(head.root, db.clone(), config.clone())?;

        info!(
            "[qc-18] DEX state service started at height {} root 0x{}",
            head.height,
            hex::encode(head.root)
        );
        Ok(Self {
            db,
            checkpoints,
            config,
            head: RwLock::new(head),
            writer: Mutex::new(()),
        })
    }

    /// Service over fresh in-memory storage.
    pub fn in_memory(config: DexStateConfig) -> Result<Self, DexStateError> {
        Self::new(
            Arc::new(InMemoryTrieDb::new()),
            Arc::new(InMemoryCheckpointStorage::new()),
            config,
        )
    }

    pub fn config(&self) -> &DexStateConfig {
        &self.config
    }

    /// Height and root of the latest committed step.
    pub fn head(&self) -> (u64, Hash) {
        let head = *self.head.read();
        (head.height, head.root)
    }

    /// Open the latest committed version.
    pub fn state(&self) -> Result<DexState, DexStateError> {
        let root = self.head.read().root;
        DexState::open(root, self.db.clone(), self.config.clone())
    }

    /// Open the version that was current at `height`.
    pub fn state_at(&self, height: u64) -> Result<DexState, DexStateError> {
        let root = self.root_at(height)?;
        DexState::open(root, self.db.clone(), self.config.clone())
    }

    /// Root of the nearest checkpoint at or below `height`.
    ///
    /// Heights before the first recorded step resolve to the empty root.
    /// Heights whose checkpoints were pruned fail with `Pruned`.
    fn root_at(&self, height: u64) -> Result<Hash, DexStateError> {
        if let Some((_, root)) = self.checkpoints.get_nearest_checkpoint(height)? {
            return Ok(root);
        }
        // Read after the lookup: a concurrent prune raises the floor first.
        let floor = self.checkpoints.pruned_below()?;
        if height < floor {
            return Err(DexStateError::Pruned { height, floor });
        }
        Ok(EMPTY_TRIE_ROOT)
    }

    /// Run one state transition step at `height`.
    ///
    /// `step` mutates a working copy of the head state. On success the copy is
    /// committed, checkpointed and published; on any error it is discarded.
    /// Returns the step's value and the new state root.
    ///
    /// # Errors
    ///
    /// `StaleHeight` if `height` is below the current head, otherwise whatever
    /// `step`, commit, or checkpoint recording reported. Pruning runs after
    /// publication and only logs its failures.
    pub fn apply_step<T>(
        &self,
        height: u64,
        step: impl FnOnce(&mut DexState) -> Result<T, DexStateError>,
    ) -> Result<(T, Hash), DexStateError> {
        let _writer = self.writer.lock();
        let head = *self.head.read();
        if height < head.height {
            return Err(DexStateError::StaleHeight {
                height,
                head: head.height,
            });
        }

        let outcome = DexState::open(head.root, self.db.clone(), self.config.clone())
            .and_then(|mut working| {
                let value = step(&mut working)?;
                let root = working.commit()?;
                self.checkpoints.record_checkpoint(height, root)?;
                Ok((value, root))
            });
        let (value, root) = match outcome {
            Ok(done) => done,
            Err(e) => {
                warn!("[qc-18] Step at height {} discarded: {}", height, e);
                return Err(e);
            }
        };

        *self.head.write() = Head { height, root };
        debug!(
            "[qc-18] Head advanced to height {} root 0x{}",
            height,
            hex::encode(root)
        );

        // The step is published; a failed prune must not report it as failed.
        let retention = self.config.checkpoint_retention;
        if retention > 0 && height > retention {
            match self.prune_checkpoints(height - retention) {
                Ok(0) => {}
                Ok(pruned) => debug!(
                    "[qc-18] Pruned {} checkpoints behind height {}",
                    pruned,
                    height - retention
                ),
                Err(e) => warn!("[qc-18] Checkpoint pruning at height {} failed: {}", height, e),
            }
        }
        Ok((value, root))
    }

    /// Drop checkpoints no longer needed to resolve heights at or above
    /// `keep_after`. Returns how many were removed.
    pub fn prune_checkpoints(&self, keep_after: u64) -> Result<u64, DexStateError> {
        Ok(self.checkpoints.prune_checkpoints(keep_after)?)
    }
}

impl DexStateApi for DexStateService {
    fn best_ask(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.state()?.best_ask(book)
    }

    fn best_bid(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.state()?.best_bid(book)
    }

    fn dump_asks(&self, book: BookId) -> Result<BookSnapshot, DexStateError> {
        self.state()?.dump_asks(book)
    }

    fn dump_bids(&self, book: BookId) -> Result<BookSnapshot, DexStateError> {
        self.state()?.dump_bids(book)
    }

    fn get_nonce(&self, book: BookId) -> Result<u64, DexStateError> {
        self.state()?.get_nonce(book)
    }

    fn place(
        &self,
        height: u64,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
        volume: Volume,
    ) -> Result<Hash, DexStateError> {
        self.apply_step(height, |state| state.place(book, side, price, order, volume))
            .map(|(_, root)| root)
    }

    fn cancel(
        &self,
        height: u64,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
    ) -> Result<Hash, DexStateError> {
        self.apply_step(height, |state| state.cancel(book, side, price, order))
            .map(|(_, root)| root)
    }

    fn get_state_root(&self, height: u64) -> Result<Hash, DexStateError> {
        self.root_at(height)
    }

    fn get_current_state_root(&self) -> Result<Hash, DexStateError> {
        Ok(self.head.read().root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrieError;
    use primitive_types::U256;

    fn u(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn test_failed_step_is_discarded() {
        let service = DexStateService::in_memory(DexStateConfig::default()).unwrap();
        let book = BookId::from_name("BOOK1");
        service.place(1, book, Side::Ask, u(100), u(1), u(5)).unwrap();
        let before = service.head();

        let result = service.apply_step(2, |state| {
            state.place(book, Side::Ask, u(90), u(2), u(10))?;
            state.place(book, Side::Ask, u(90), u(3), U256::zero())
        });
        assert!(matches!(result, Err(DexStateError::Encoding(_))));
        assert_eq!(service.head(), before);
        assert_eq!(service.best_ask(book).unwrap(), Some((u(100), u(5))));
    }

    #[test]
    fn test_stale_height_rejected() {
        let service = DexStateService::in_memory(DexStateConfig::default()).unwrap();
        let book = BookId::from_name("BOOK1");
        service.place(5, book, Side::Bid, u(1), u(1), u(1)).unwrap();
        assert!(matches!(
            service.place(4, book, Side::Bid, u(1), u(2), u(1)),
            Err(DexStateError::StaleHeight { height: 4, head: 5 })
        ));
        // Same height is another step of the same block.
        assert!(service.place(5, book, Side::Bid, u(1), u(2), u(1)).is_ok());
    }

    #[test]
    fn test_historical_state() {
        let service = DexStateService::in_memory(DexStateConfig::default()).unwrap();
        let book = BookId::from_name("BOOK1");
        let r1 = service.place(10, book, Side::Ask, u(100), u(1), u(5)).unwrap();
        let r2 = service.place(20, book, Side::Ask, u(90), u(2), u(1)).unwrap();

        assert_eq!(service.get_state_root(15).unwrap(), r1);
        assert_eq!(service.get_state_root(25).unwrap(), r2);
        assert_eq!(service.get_state_root(5).unwrap(), EMPTY_TRIE_ROOT);
        assert_eq!(service.get_current_state_root().unwrap(), r2);
        assert_eq!(service.state_at(15).unwrap().best_ask(book).unwrap(), Some((u(100), u(5))));
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
        let checkpoints: Arc<dyn CheckpointStorage> = Arc::new(InMemoryCheckpointStorage::new());
        let book = BookId::from_name("BOOK1");
        let root = {
            let service =
                DexStateService::new(db.clone(), checkpoints.clone(), DexStateConfig::default())
                    .unwrap();
            service.place(3, book, Side::Bid, u(70), u(1), u(2)).unwrap()
        };

        let resumed = DexStateService::new(db, checkpoints, DexStateConfig::default()).unwrap();
        assert_eq!(resumed.head(), (3, root));
        assert_eq!(resumed.best_bid(book).unwrap(), Some((u(70), u(2))));
    }

    #[test]
    fn test_checkpoint_retention() {
        let config = DexStateConfig::default().with_checkpoint_retention(10);
        let service = DexStateService::in_memory(config).unwrap();
        let book = BookId::from_name("BOOK1");
        for height in [1, 5, 12, 30] {
            service.place(height, book, Side::Ask, u(height), u(height), u(1)).unwrap();
        }
        // Heights from 20 on stay resolvable, so the checkpoint at 12 is kept.
        assert_eq!(
            service.state_at(12).unwrap().best_ask(book).unwrap(),
            Some((u(1), u(1)))
        );
        assert_eq!(
            service.state_at(25).unwrap().dump_asks(book).unwrap().len(),
            3
        );
        assert!(matches!(
            service.get_state_root(5),
            Err(DexStateError::Pruned { height: 5, floor: 12 })
        ));
        assert!(matches!(
            service.state_at(11),
            Err(DexStateError::Pruned { height: 11, floor: 12 })
        ));
        assert_eq!(
            service.get_state_root(0).unwrap_err().to_string(),
            "Height 0 was pruned; oldest retained is 12"
        );
    }

    #[test]
    fn test_empty_root_before_first_step() {
        let config = DexStateConfig::default().with_checkpoint_retention(10);
        let service = DexStateService::in_memory(config).unwrap();
        let book = BookId::from_name("BOOK1");
        service.place(7, book, Side::Bid, u(50), u(1), u(3)).unwrap();
        assert_eq!(service.get_state_root(6).unwrap(), EMPTY_TRIE_ROOT);
        assert!(matches!(
            service.state_at(6).unwrap().best_bid(book),
            Err(DexStateError::BookNotFound { .. })
        ));
    }

    /// Checkpoint storage whose pruning always fails.
    struct FailingPrune(InMemoryCheckpointStorage);

    impl CheckpointStorage for FailingPrune {
        fn record_checkpoint(&self, height: u64, root: Hash) -> Result<(), TrieError> {
            self.0.record_checkpoint(height, root)
        }

        fn get_nearest_checkpoint(&self, height: u64) -> Result<Option<(u64, Hash)>, TrieError> {
            self.0.get_nearest_checkpoint(height)
        }

        fn latest_checkpoint(&self) -> Result<Option<(u64, Hash)>, TrieError> {
            self.0.latest_checkpoint()
        }

        fn prune_checkpoints(&self, _keep_after: u64) -> Result<u64, TrieError> {
            Err(TrieError::Database("prune failed".into()))
        }

        fn pruned_below(&self) -> Result<u64, TrieError> {
            self.0.pruned_below()
        }
    }

    #[test]
    fn test_prune_failure_keeps_step_committed() {
        let service = DexStateService::new(
            Arc::new(InMemoryTrieDb::new()),
            Arc::new(FailingPrune(InMemoryCheckpointStorage::new())),
            DexStateConfig::default().with_checkpoint_retention(1),
        )
        .unwrap();
        let book = BookId::from_name("BOOK1");

        let root = service.place(5, book, Side::Ask, u(100), u(1), u(5)).unwrap();
        assert_eq!(service.head(), (5, root));
        assert_eq!(service.best_ask(book).unwrap(), Some((u(100), u(5))));
        assert_eq!(service.get_state_root(5).unwrap(), root);
    }
}
