use crate::domain::{BookId, BookSnapshot, DexStateError, Hash, OrderId, Price, Side, Volume};

/// Primary API for order book state.
///
/// Reads observe the latest committed version. Each write is one state
/// transition step at `height`: it either commits in full or leaves the
/// committed state untouched.
pub trait DexStateApi: Send + Sync {
    // === Queries ===

    fn best_ask(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError>;

    fn best_bid(&self, book: BookId) -> Result<Option<(Price, Volume)>, DexStateError>;

    fn dump_asks(&self, book: BookId) -> Result<BookSnapshot, DexStateError>;

    fn dump_bids(&self, book: BookId) -> Result<BookSnapshot, DexStateError>;

    fn get_nonce(&self, book: BookId) -> Result<u64, DexStateError>;

    // === Mutations ===

    fn place(
        &self,
        height: u64,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
        volume: Volume,
    ) -> Result<Hash, DexStateError>;

    fn cancel(
        &self,
        height: u64,
        book: BookId,
        side: Side,
        price: Price,
        order: OrderId,
    ) -> Result<Hash, DexStateError>;

    // === State Root ===

    /// Root committed as of `height`. `Pruned` if that checkpoint is gone.
    fn get_state_root(&self, height: u64) -> Result<Hash, DexStateError>;

    fn get_current_state_root(&self) -> Result<Hash, DexStateError>;
}
