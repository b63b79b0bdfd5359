// =============================================================================
// Order Book Store — whole-snapshot depth state
// =============================================================================
//
// The venue sends full top-N depth snapshots, not deltas, so each update
// replaces both sides wholesale. The current pair lives behind an Arc swap:
// readers always hold either the old pair or the new pair in full.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

/// One price level on one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookLevel {
    pub price: f64,
    pub volume: f64,
}

/// A full depth snapshot decoded from one venue message: raw
/// `(price, volume)` pairs in arrival order, unsorted and untrusted.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Immutable, normalized order-book state: bids sorted descending, asks
/// ascending, each side price-deduplicated.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Wall-clock time the snapshot was stored, epoch milliseconds.
    pub as_of: i64,
}

impl OrderBookSnapshot {
    pub fn empty() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            as_of: 0,
        }
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }
}

/// Holds the current snapshot for one symbol.
pub struct OrderBookStore {
    depth_cap: usize,
    current: RwLock<Arc<OrderBookSnapshot>>,
    updates: AtomicU64,
}

impl OrderBookStore {
    /// `depth_cap` bounds the levels retained per side.
    pub fn new(depth_cap: usize) -> Self {
        Self {
            depth_cap,
            current: RwLock::new(Arc::new(OrderBookSnapshot::empty())),
            updates: AtomicU64::new(0),
        }
    }

    /// Replace the book with a fresh snapshot. Last write wins at
    /// whole-pair granularity; the swap is the only lock-held work.
    pub fn on_depth_update(&self, update: DepthUpdate) {
        let snapshot = Arc::new(OrderBookSnapshot {
            bids: normalize_side(update.bids, Side::Bids, self.depth_cap),
            asks: normalize_side(update.asks, Side::Asks, self.depth_cap),
            as_of: Utc::now().timestamp_millis(),
        });
        *self.current.write() = snapshot;
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recent pair as an immutable snapshot — never a mix of old
    /// bids with new asks.
    pub fn snapshot(&self) -> Arc<OrderBookSnapshot> {
        self.current.read().clone()
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Bids,
    Asks,
}

/// Defensive normalization: drop non-finite entries, deduplicate by price
/// (last occurrence in arrival order wins — a duplicate is a venue protocol
/// irregularity), sort bids descending / asks ascending, cap the depth.
fn normalize_side(levels: Vec<(f64, f64)>, side: Side, cap: usize) -> Vec<BookLevel> {
    let mut by_price: HashMap<u64, BookLevel> = HashMap::with_capacity(levels.len());
    for (price, volume) in levels {
        if !price.is_finite() || !volume.is_finite() {
            continue;
        }
        by_price.insert(price.to_bits(), BookLevel { price, volume });
    }

    let mut out: Vec<BookLevel> = by_price.into_values().collect();
    match side {
        Side::Bids => out.sort_by(|a, b| b.price.total_cmp(&a.price)),
        Side::Asks => out.sort_by(|a, b| a.price.total_cmp(&b.price)),
    }
    out.truncate(cap);
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn prices(levels: &[BookLevel]) -> Vec<f64> {
        levels.iter().map(|l| l.price).collect()
    }

    #[test]
    fn sides_are_sorted_after_update() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![(90.0, 1.0), (100.0, 2.0), (95.0, 3.0)],
            asks: vec![(110.0, 1.0), (101.0, 2.0), (105.0, 3.0)],
        });

        let snap = store.snapshot();
        assert_eq!(prices(&snap.bids), vec![100.0, 95.0, 90.0]);
        assert_eq!(prices(&snap.asks), vec![101.0, 105.0, 110.0]);
        assert_eq!(snap.best_bid().unwrap().price, 100.0);
        assert_eq!(snap.best_ask().unwrap().price, 101.0);
    }

    #[test]
    fn duplicate_price_last_occurrence_wins() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![(100.0, 1.0), (90.0, 2.0), (100.0, 5.0)],
            asks: vec![],
        });

        let snap = store.snapshot();
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.bids[0].price, 100.0);
        assert_eq!(snap.bids[0].volume, 5.0);
        assert_eq!(snap.bids[1].price, 90.0);
        assert_eq!(snap.bids[1].volume, 2.0);
    }

    #[test]
    fn update_replaces_wholesale() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![(100.0, 1.0), (99.0, 1.0)],
            asks: vec![(101.0, 1.0)],
        });
        store.on_depth_update(DepthUpdate {
            bids: vec![(50.0, 7.0)],
            asks: vec![(51.0, 7.0), (52.0, 7.0)],
        });

        let snap = store.snapshot();
        assert_eq!(prices(&snap.bids), vec![50.0], "no merge with the prior book");
        assert_eq!(prices(&snap.asks), vec![51.0, 52.0]);
        assert_eq!(store.update_count(), 2);
    }

    #[test]
    fn depth_is_capped_to_best_levels() {
        let store = OrderBookStore::new(2);
        store.on_depth_update(DepthUpdate {
            bids: vec![(97.0, 1.0), (100.0, 1.0), (98.0, 1.0), (99.0, 1.0)],
            asks: vec![(104.0, 1.0), (101.0, 1.0), (103.0, 1.0), (102.0, 1.0)],
        });

        let snap = store.snapshot();
        assert_eq!(prices(&snap.bids), vec![100.0, 99.0]);
        assert_eq!(prices(&snap.asks), vec![101.0, 102.0]);
    }

    #[test]
    fn non_finite_levels_are_dropped() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![(f64::NAN, 1.0), (100.0, f64::INFINITY), (99.0, 1.0)],
            asks: vec![],
        });

        let snap = store.snapshot();
        assert_eq!(prices(&snap.bids), vec![99.0]);
    }

    #[test]
    fn readers_hold_a_stable_pair() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![(100.0, 1.0)],
            asks: vec![(101.0, 1.0)],
        });

        let held = store.snapshot();
        store.on_depth_update(DepthUpdate {
            bids: vec![(200.0, 1.0)],
            asks: vec![(201.0, 1.0)],
        });

        // The earlier reader still sees its full old pair.
        assert_eq!(held.best_bid().unwrap().price, 100.0);
        assert_eq!(held.best_ask().unwrap().price, 101.0);
        let fresh = store.snapshot();
        assert_eq!(fresh.best_bid().unwrap().price, 200.0);
        assert_eq!(fresh.best_ask().unwrap().price, 201.0);
    }

    #[test]
    fn empty_update_yields_empty_book() {
        let store = OrderBookStore::new(20);
        store.on_depth_update(DepthUpdate {
            bids: vec![],
            asks: vec![],
        });
        let snap = store.snapshot();
        assert!(snap.bids.is_empty());
        assert!(snap.asks.is_empty());
        assert!(snap.best_bid().is_none());
    }
}
