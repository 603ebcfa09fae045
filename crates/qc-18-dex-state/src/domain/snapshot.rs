//! # Book Snapshots
//!
//! Fully materialized, point-in-time dumps of one side of an order book.

use super::{OrderId, Price, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All resting orders at one price.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpOrderList {
    /// Aggregate volume recorded on the price level.
    pub volume: Volume,
    /// Remaining volume per order, ascending by order id.
    pub orders: BTreeMap<OrderId, Volume>,
}

/// One side of a book, ascending by price.
pub type BookSnapshot = BTreeMap<Price, DumpOrderList>;

/// Flatten a snapshot into `(price, order, volume)` triples, ascending.
pub fn order_triples(snapshot: &BookSnapshot) -> Vec<(Price, OrderId, Volume)> {
    snapshot
        .iter()
        .flat_map(|(price, level)| {
            level
                .orders
                .iter()
                .map(move |(order, volume)| (*price, *order, *volume))
        })
        .collect()
}
