//! # Price Level Book
//!
//! One side (ask or bid) of an order book: `Price -> PriceLevel`, where each
//! level points at an [`OrderQueue`].
//!
//! ## Invariants
//!
//! - A level's `volume` equals the sum of the order volumes in its queue.
//! - A level with zero volume does not exist.
//!
//! ## Queue Residency
//!
//! Queues touched by a write stay open in `queues` until commit. Their roots
//! are written back into the level values on `sync_queue_roots`/`commit`, so
//! a level's stored `queue_root` may lag an open queue until then. Reads
//! always prefer the open queue.

use super::{
    ordered::{OrderedTrie, TrieContext},
    BookId, BookSnapshot, DexStateError, DumpOrderList, Hash, OrderId, OrderQueue, Price,
    PriceLevel, Side, TrieError, Volume, VolumeDelta, EMPTY_TRIE_ROOT,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub struct PriceLevelBook {
    book: BookId,
    side: Side,
    levels: OrderedTrie<PriceLevel>,
    queues: HashMap<Price, OrderQueue>,
    ctx: TrieContext,
    parallel_snapshot: bool,
}

impl PriceLevelBook {
    /// Open one side of `book` at `root`.
    pub fn open(
        book: BookId,
        side: Side,
        root: Hash,
        ctx: TrieContext,
        parallel_snapshot: bool,
    ) -> Result<Self, DexStateError> {
        Ok(Self {
            book,
            side,
            levels: ctx.open(root, "price level")?,
            queues: HashMap::new(),
            ctx,
            parallel_snapshot,
        })
    }

    fn corrupt(&self, err: TrieError) -> DexStateError {
        err.in_book(self.book)
    }

    /// Open the queue a stored level points at. A level whose queue root
    /// cannot be resolved is corrupt.
    fn open_queue(&self, price: Price, level: &PriceLevel) -> Result<OrderQueue, DexStateError> {
        OrderQueue::open(&self.ctx, level.queue_root).map_err(|e| match e {
            DexStateError::TrieOpen { root } => DexStateError::CorruptState {
                book: self.book,
                detail: format!(
                    "{} queue root 0x{} at price {price} unresolvable",
                    self.side,
                    hex::encode(root)
                ),
            },
            other => other,
        })
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Apply `delta` to `order` resting at `price`.
    ///
    /// Opens the price level if needed, keeps its aggregate volume in step
    /// with the queue, and deletes the order or the whole level once it
    /// drains to zero. Returns the order's remaining volume.
    pub fn upsert_order(
        &mut self,
        price: Price,
        order: OrderId,
        delta: VolumeDelta,
    ) -> Result<Volume, DexStateError> {
        if delta.amount().is_zero() {
            return Err(DexStateError::Encoding(format!(
                "zero volume delta for order {order} at price {price}"
            )));
        }

        let level = self
            .levels
            .get(&price)
            .map_err(|e| self.corrupt(e))?
            .unwrap_or_default();
        if !self.queues.contains_key(&price) {
            let queue = self.open_queue(price, &level)?;
            self.queues.insert(price, queue);
        }
        let book = self.book;
        let Some(queue) = self.queues.get_mut(&price) else {
            return Err(DexStateError::CorruptState {
                book,
                detail: format!("queue at price {price} not open"),
            });
        };

        let current = queue.volume_of(&order).map_err(|e| e.in_book(book))?;
        let old = current.unwrap_or_default();
        let new = match delta {
            VolumeDelta::Increase(v) => old
                .checked_add(v)
                .ok_or(DexStateError::VolumeOverflow { price, order })?,
            VolumeDelta::Decrease(_) if current.is_none() => return Ok(Volume::zero()),
            VolumeDelta::Decrease(v) => old.saturating_sub(v),
        };

        let aggregate = level
            .volume
            .checked_sub(old)
            .ok_or_else(|| DexStateError::CorruptState {
                book,
                detail: format!(
                    "aggregate {} at price {price} below order {order} volume {old}",
                    level.volume
                ),
            })?
            .checked_add(new)
            .ok_or(DexStateError::VolumeOverflow { price, order })?;

        queue.set_volume(&order, new).map_err(|e| e.in_book(book))?;

        if aggregate.is_zero() {
            if !queue.is_empty() {
                return Err(DexStateError::CorruptState {
                    book,
                    detail: format!("price {price} drained to zero with orders left"),
                });
            }
            self.queues.remove(&price);
            self.levels.delete(&price).map_err(|e| e.in_book(book))?;
            debug!("[qc-18] {} {} level {} removed", self.book, self.side, price);
        } else {
            let updated = PriceLevel::new(aggregate, level.queue_root);
            self.levels
                .update(&price, &updated)
                .map_err(|e| e.in_book(book))?;
        }

        debug!(
            "[qc-18] {} {} order {} @ {}: {} -> {}",
            self.book, self.side, order, price, old, new
        );
        Ok(new)
    }

    /// Delete `order` from the level at `price`.
    ///
    /// Absent levels and orders are a no-op. Returns the removed volume.
    pub fn remove_order(
        &mut self,
        price: Price,
        order: OrderId,
    ) -> Result<Option<Volume>, DexStateError> {
        let Some(volume) = self.order_volume(price, order)? else {
            debug!(
                "[qc-18] {} {} cancel of absent order {} @ {}",
                self.book, self.side, order, price
            );
            return Ok(None);
        };
        self.upsert_order(price, order, VolumeDelta::Decrease(volume))?;
        Ok(Some(volume))
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Stored value of the level at `price`.
    pub fn level(&self, price: Price) -> Result<Option<PriceLevel>, DexStateError> {
        self.levels.get(&price).map_err(|e| self.corrupt(e))
    }

    /// Remaining volume of one order.
    pub fn order_volume(&self, price: Price, order: OrderId) -> Result<Option<Volume>, DexStateError> {
        if let Some(queue) = self.queues.get(&price) {
            return queue.volume_of(&order).map_err(|e| self.corrupt(e));
        }
        match self.level(price)? {
            None => Ok(None),
            Some(level) => self
                .open_queue(price, &level)?
                .volume_of(&order)
                .map_err(|e| self.corrupt(e)),
        }
    }

    /// Lowest price level.
    pub fn best_left(&self) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.levels
            .best_left()
            .map(|best| best.map(|(price, level)| (price, level.volume)))
            .map_err(|e| self.corrupt(e))
    }

    /// Highest price level.
    pub fn best_right(&self) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.levels
            .best_right()
            .map(|best| best.map(|(price, level)| (price, level.volume)))
            .map_err(|e| self.corrupt(e))
    }

    /// Best quote for this side: lowest ask or highest bid.
    pub fn best_price(&self) -> Result<Option<(Price, Volume)>, DexStateError> {
        match self.side {
            Side::Ask => self.best_left(),
            Side::Bid => self.best_right(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Materialize every level and its orders, ascending by price then order id.
    ///
    /// Fails with `CorruptState` if a level's aggregate does not match the
    /// sum of its orders.
    pub fn snapshot(&self) -> Result<BookSnapshot, DexStateError> {
        let levels = self
            .levels
            .iter()
            .collect::<Result<Vec<(Price, PriceLevel)>, TrieError>>()
            .map_err(|e| self.corrupt(e))?;

        let dumped: Vec<(Price, DumpOrderList)> = if self.parallel_snapshot {
            levels
                .par_iter()
                .map(|(price, level)| self.dump_level(*price, level))
                .collect::<Result<_, _>>()?
        } else {
            levels
                .iter()
                .map(|(price, level)| self.dump_level(*price, level))
                .collect::<Result<_, _>>()?
        };

        Ok(dumped.into_iter().collect())
    }

    fn dump_level(
        &self,
        price: Price,
        level: &PriceLevel,
    ) -> Result<(Price, DumpOrderList), DexStateError> {
        let opened;
        let queue = match self.queues.get(&price) {
            Some(queue) => queue,
            None => {
                opened = self.open_queue(price, level)?;
                &opened
            }
        };

        let orders = queue
            .iter()
            .collect::<Result<BTreeMap<OrderId, Volume>, TrieError>>()
            .map_err(|e| self.corrupt(e))?;

        let sum = orders
            .values()
            .try_fold(Volume::zero(), |acc, v| acc.checked_add(*v));
        if sum != Some(level.volume) {
            return Err(DexStateError::CorruptState {
                book: self.book,
                detail: format!(
                    "{} level {price} records volume {} but orders sum to {:?}",
                    self.side, level.volume, sum
                ),
            });
        }

        Ok((
            price,
            DumpOrderList {
                volume: level.volume,
                orders,
            },
        ))
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Write the current root of every open queue into its level value.
    pub fn sync_queue_roots(&mut self) -> Result<(), DexStateError> {
        let book = self.book;
        for (price, queue) in &self.queues {
            Self::write_queue_root(&mut self.levels, book, *price, queue.root_hash())?;
        }
        Ok(())
    }

    /// Commit every open queue, then the level trie. Returns the side root.
    pub fn commit(&mut self) -> Result<Hash, DexStateError> {
        let book = self.book;
        for (price, queue) in self.queues.iter_mut() {
            let root = queue.commit().map_err(|e| e.in_book(book))?;
            Self::write_queue_root(&mut self.levels, book, *price, root)?;
        }
        self.queues.clear();
        self.levels.commit().map_err(|e| e.in_book(book))
    }

    /// Current side root (queue roots synced first).
    pub fn root_hash(&mut self) -> Result<Hash, DexStateError> {
        self.sync_queue_roots()?;
        Ok(self.levels.root_hash())
    }

    fn write_queue_root(
        levels: &mut OrderedTrie<PriceLevel>,
        book: BookId,
        price: Price,
        root: Hash,
    ) -> Result<(), DexStateError> {
        let Some(mut level) = levels.get(&price).map_err(|e| e.in_book(book))? else {
            if root != EMPTY_TRIE_ROOT {
                return Err(DexStateError::CorruptState {
                    book,
                    detail: format!("open queue at price {price} has no level"),
                });
            }
            return Ok(());
        };
        if level.queue_root != root {
            level.queue_root = root;
            levels.update(&price, &level).map_err(|e| e.in_book(book))?;
        }
        Ok(())
    }
}
