//! # Exchange State
//!
//! The state database of the DEX: a top-level trie mapping every order book
//! id to its [`ExchangeObject`], and through it to the ask and bid side tries.
//!
//! ## Book Lifecycle
//!
//! A book is uninitialized until the first write path touches it. At that
//! point an empty `ExchangeObject` is written under its id and both sides
//! open empty. Books are never torn down individually.
//!
//! ## Commit Order
//!
//! ```text
//! order queues ──→ price levels ──→ exchange objects ──→ preimages ──→ state trie
//! ```
//!
//! Nodes are content-addressed, so a commit that fails halfway leaves only
//! unreachable nodes behind. The new root is meaningful only once returned.

use super::{
    key_to_u256,
    ordered::{OrderedTrie, TrieContext},
    u256_to_key, BookId, BookSnapshot, DexStateConfig, DexStateError, ExchangeObject, Hash,
    OrderId, Price, PriceLevelBook, Side, Volume, VolumeDelta,
};
use crate::ports::SharedTrieDb;
use primitive_types::U256;
use std::collections::HashMap;
use std::ops::Deref;
use tracing::info;

/// Both sides of one book, opened for writing.
pub struct BookHandle {
    book: BookId,
    object: ExchangeObject,
    asks: PriceLevelBook,
    bids: PriceLevelBook,
}

impl BookHandle {
    pub fn side_mut(&mut self, side: Side) -> &mut PriceLevelBook {
        match side {
            Side::Ask => &mut self.asks,
            Side::Bid => &mut self.bids,
        }
    }

    /// Object with side roots synced to the current (uncommitted) content.
    fn synced_object(&mut self) -> Result<ExchangeObject, DexStateError> {
        let mut object = self.object;
        object.set_side_root(Side::Ask, self.asks.root_hash()?);
        object.set_side_root(Side::Bid, self.bids.root_hash()?);
        Ok(object)
    }
}

enum Held<'a> {
    Cached(&'a PriceLevelBook),
    Opened(PriceLevelBook),
}

impl Deref for Held<'_> {
    type Target = PriceLevelBook;

    fn deref(&self) -> &PriceLevelBook {
        match self {
            Held::Cached(levels) => levels,
            Held::Opened(levels) => levels,
        }
    }
}

/// Read-only view of an initialized book.
pub struct BookView<'a> {
    asks: Held<'a>,
    bids: Held<'a>,
}

impl BookView<'_> {
    pub fn side(&self, side: Side) -> &PriceLevelBook {
        match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        }
    }
}

/// Order book state of the whole exchange at one version.
///
/// Not thread-safe for writes; one step mutates one `DexState` at a time.
/// [`DexStateService`](crate::service::DexStateService) provides the
/// versioned, shareable wrapper.
pub struct DexState {
    objects: OrderedTrie<ExchangeObject>,
    books: HashMap<BookId, BookHandle>,
    ctx: TrieContext,
    config: DexStateConfig,
}

impl DexState {
    /// Empty state database.
    pub fn new(db: SharedTrieDb, config: DexStateConfig) -> Result<Self, DexStateError> {
        Self::open(super::EMPTY_TRIE_ROOT, db, config)
    }

    /// Open the state committed under `root`.
    pub fn open(root: Hash, db: SharedTrieDb, config: DexStateConfig) -> Result<Self, DexStateError> {
        config.validate()?;
        let ctx = TrieContext::new(db, config.key_scheme, config.max_depth);
        Ok(Self {
            objects: ctx.open(root, "exchange object")?,
            books: HashMap::new(),
            ctx,
            config,
        })
    }

    pub fn config(&self) -> &DexStateConfig {
        &self.config
    }

    fn object_key(book: &BookId) -> U256 {
        key_to_u256(book.as_bytes())
    }

    fn load_object(&self, book: BookId) -> Result<Option<ExchangeObject>, DexStateError> {
        self.objects
            .get(&Self::object_key(&book))
            .map_err(|e| e.in_book(book))
    }

    fn open_side(&self, book: BookId, object: &ExchangeObject, side: Side) -> Result<PriceLevelBook, DexStateError> {
        PriceLevelBook::open(
            book,
            side,
            object.side_root(side),
            self.ctx.clone(),
            self.config.parallel_snapshot,
        )
    }

    // =========================================================================
    // BOOK ACCESS
    // =========================================================================

    /// View of an initialized book for read paths.
    ///
    /// Fails with `BookNotFound` if no write has ever touched `book`.
    pub fn for_book(&self, book: BookId) -> Result<BookView<'_>, DexStateError> {
        if let Some(handle) = self.books.get(&book) {
            return Ok(BookView {
                asks: Held::Cached(&handle.asks),
                bids: Held::Cached(&handle.bids),
            });
        }
        let object = self
            .load_object(book)?
            .ok_or(DexStateError::BookNotFound { book })?;
        Ok(BookView {
            asks: Held::Opened(self.open_side(book, &object, Side::Ask)?),
            bids: Held::Opened(self.open_side(book, &object, Side::Bid)?),
        })
    }

    /// Writable handle for `book`, initializing it on first use.
    pub fn open_or_create(&mut self, book: BookId) -> Result<&mut BookHandle, DexStateError> {
        if !self.books.contains_key(&book) {
            let object = match self.load_object(book)? {
                Some(object) => object,
                None => {
                    let object = ExchangeObject::default();
                    self.objects
                        .update(&Self::object_key(&book), &object)
                        .map_err(|e| e.in_book(book))?;
                    info!("[qc-18] Order book {} initialized", book);
                    object
                }
            };
            let handle = BookHandle {
                book,
                asks: self.open_side(book, &object, Side::Ask)?,
                bids: self.open_side(book, &object, Side::Bid)?,
                object,
            };
            self.books.insert(book, handle);
        }
        self.books
            .get_mut(&book)
            .ok_or(DexStateError::BookNotFound { book })
    }

    /// Ids of every initialized book, ascending.
    pub fn book_ids(&self) -> Result<Vec<BookId>, DexStateError> {
        self.objects
            .iter()
            .map(|entry| entry.map(|(key, _)| BookId(u256_to_key(&key))))
            .collect::<Result<_, _>>()
            .map_err(DexStateError::from)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Lowest ask `(price, aggregate volume)`; `None` if the ask side is empty.
    pub fn best_ask(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.for_book(book)?.side(Side::Ask).best_price()
    }

    /// Highest bid `(price, aggregate volume)`; `None` if the bid side is empty.
    pub fn best_bid(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError> {
        self.for_book(book)?.side(Side::Bid).best_price()
    }

    pub fn dump_asks(&self, book: BookId) -> Result<BookSnapshot, DexStateError> {
        self.for_book(book)?.side(Side::Ask).snapshot()
    }

    pub fn dump_bids(&self, book: BookId) -> Result<BookSnapshot, DexStateError> {
        self.for_book(book)?.side(Side::Bid).snapshot()
    }

    /// Nonce of `book`; 0 for a book that was never initialized.
    pub fn get_nonce(&self, book: BookId) -> Result<u64, DexStateError> {
        if let Some(handle) = self.books.get(&book) {
            return Ok(handle.object.nonce);
        }
        Ok(self.load_object(book)?.map_or(0, |object| object.nonce))
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Rest `volume` more of `order` at `price`. Returns the order's volume.
    pub fn place(
        &mut self,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
        volume: Volume,
    ) -> Result<Volume, DexStateError> {
        if volume.is_zero() {
            return Err(DexStateError::Encoding(format!(
                "cannot place order {order} with zero volume"
            )));
        }
        self.open_or_create(book)?
            .side_mut(side)
            .upsert_order(price, order, VolumeDelta::Increase(volume))
    }

    /// Apply a signed volume change to one order.
    pub fn upsert_order(
        &mut self,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
        delta: VolumeDelta,
    ) -> Result<Volume, DexStateError> {
        if delta.amount().is_zero() {
            return Err(DexStateError::Encoding(format!(
                "zero volume delta for order {order} at price {price}"
            )));
        }
        self.open_or_create(book)?
            .side_mut(side)
            .upsert_order(price, order, delta)
    }

    /// Remove `order` entirely. Returns the volume it had, if it existed.
    ///
    /// Cancelling on an uninitialized book is a no-op and does not initialize it.
    pub fn cancel(
        &mut self,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
    ) -> Result<Option<Volume>, DexStateError> {
        if !self.books.contains_key(&book) && self.load_object(book)?.is_none() {
            return Ok(None);
        }
        self.open_or_create(book)?
            .side_mut(side)
            .remove_order(price, order)
    }

    pub fn set_nonce(&mut self, book: BookId, nonce: u64) -> Result<(), DexStateError> {
        self.open_or_create(book)?.object.nonce = nonce;
        Ok(())
    }

    // =========================================================================
    // ROOTS
    // =========================================================================

    /// State root including uncommitted changes. Nothing is persisted.
    pub fn intermediate_root(&mut self) -> Result<Hash, DexStateError> {
        for handle in self.books.values_mut() {
            let book = handle.book;
            let object = handle.synced_object()?;
            self.objects
                .update(&Self::object_key(&book), &object)
                .map_err(|e| e.in_book(book))?;
        }
        Ok(self.objects.root_hash())
    }

    /// Persist every open book and the state trie. Returns the new state root.
    pub fn commit(&mut self) -> Result<Hash, DexStateError> {
        let touched = self.books.len();
        for handle in self.books.values_mut() {
            let book = handle.book;
            let asks_root = handle.asks.commit()?;
            let bids_root = handle.bids.commit()?;
            handle.object.set_side_root(Side::Ask, asks_root);
            handle.object.set_side_root(Side::Bid, bids_root);
            self.objects
                .update(&Self::object_key(&book), &handle.object)
                .map_err(|e| e.in_book(book))?;
        }
        let preimages = self.ctx.preimages.flush()?;
        let root = self.objects.commit()?;
        self.books.clear();

        info!(
            "[qc-18] State committed: {} books, {} preimages, root 0x{}",
            touched,
            preimages,
            hex::encode(root)
        );
        Ok(root)
    }
}
