//! # Order Queue
//!
//! All resting orders at one price: `OrderId -> remaining volume`.
//! A present entry always has volume > 0; filled or cancelled orders are
//! deleted.

use super::{
    ordered::{OrderedIter, OrderedTrie, TrieContext},
    DexStateError, Hash, OrderId, TrieError, Volume,
};

pub struct OrderQueue {
    orders: OrderedTrie<Volume>,
}

impl OrderQueue {
    /// Open the queue rooted at `root`.
    pub fn open(ctx: &TrieContext, root: Hash) -> Result<Self, DexStateError> {
        Ok(Self {
            orders: ctx.open(root, "order volume")?,
        })
    }

    /// Remaining volume of `order`, if it rests here.
    pub fn volume_of(&self, order: &OrderId) -> Result<Option<Volume>, TrieError> {
        match self.orders.get(order)? {
            Some(volume) if volume.is_zero() => Err(TrieError::Decode {
                what: format!("order volume at key {order}"),
                reason: "zero volume stored".into(),
            }),
            other => Ok(other),
        }
    }

    /// Set the remaining volume; zero deletes the order.
    pub fn set_volume(&mut self, order: &OrderId, volume: Volume) -> Result<(), TrieError> {
        if volume.is_zero() {
            self.orders.delete(order)?;
        } else {
            self.orders.update(order, &volume)?;
        }
        Ok(())
    }

    /// Orders ascending by id.
    pub fn iter(&self) -> OrderedIter<'_, Volume> {
        self.orders.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn root_hash(&self) -> Hash {
        self.orders.root_hash()
    }

    pub fn commit(&mut self) -> Result<Hash, TrieError> {
        self.orders.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTrieDb;
    use crate::domain::{KeyScheme, EMPTY_TRIE_ROOT};
    use primitive_types::U256;
    use std::sync::Arc;

    fn queue() -> OrderQueue {
        let ctx = TrieContext::new(Arc::new(InMemoryTrieDb::new()), KeyScheme::Ordered, 64);
        OrderQueue::open(&ctx, EMPTY_TRIE_ROOT).unwrap()
    }

    #[test]
    fn test_iter_ascending_by_id() {
        let mut q = queue();
        q.set_volume(&U256::from(2u64), U256::from(3u64)).unwrap();
        q.set_volume(&U256::from(1u64), U256::from(5u64)).unwrap();
        let orders: Vec<_> = q.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            orders,
            vec![
                (U256::from(1u64), U256::from(5u64)),
                (U256::from(2u64), U256::from(3u64)),
            ]
        );
    }

    #[test]
    fn test_zero_volume_deletes() {
        let mut q = queue();
        q.set_volume(&U256::from(1u64), U256::from(5u64)).unwrap();
        q.set_volume(&U256::from(1u64), U256::zero()).unwrap();
        assert_eq!(q.volume_of(&U256::from(1u64)).unwrap(), None);
        assert!(q.is_empty());
        assert_eq!(q.root_hash(), EMPTY_TRIE_ROOT);
    }
}
