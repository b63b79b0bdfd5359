// =============================================================================
// Market State — the single composition root for one symbol's market view
// =============================================================================
//
// Ties the candle aggregator and the order-book store together and produces
// the composite snapshot the consumer loop polls. Both halves manage their
// own interior mutability behind separate locks; no lock spans both, so the
// depth feed's sub-second update rate never stalls candle ingestion.
//
// The consumer never holds a reference to live mutable state: `read` hands
// out a defensive candle copy and an immutable Arc'd book pair.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::market_data::{Candle, CandleAggregator, OrderBookSnapshot, OrderBookStore};
use crate::types::Timeframe;

/// Composite view handed to the consumer: one timeframe's candles plus the
/// current order book. The two halves are drawn from independent sources and
/// may be from slightly different instants; each half is internally
/// consistent.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub orderbook: Arc<OrderBookSnapshot>,
    /// Wall-clock time the snapshot was composed, epoch milliseconds.
    pub as_of: i64,
}

/// Market state shared across the feed tasks and the consumer loop via
/// `Arc<MarketState>`. Created once at startup, torn down at shutdown.
pub struct MarketState {
    pub symbol: String,
    pub aggregator: Arc<CandleAggregator>,
    pub orderbook: Arc<OrderBookStore>,
    /// Consumer-facing pause control; the feeds keep ingesting regardless.
    paused: AtomicBool,
    pub start_time: std::time::Instant,
}

impl MarketState {
    /// Construct market state for `symbol`. Callers validate the timeframe
    /// set before constructing; the returned value is typically wrapped in
    /// `Arc` immediately.
    pub fn new(
        symbol: String,
        base_tf: Timeframe,
        derived: &[Timeframe],
        candle_capacity: usize,
        depth_levels: usize,
    ) -> Self {
        Self {
            symbol,
            aggregator: Arc::new(CandleAggregator::new(base_tf, derived, candle_capacity)),
            orderbook: Arc::new(OrderBookStore::new(depth_levels)),
            paused: AtomicBool::new(false),
            start_time: std::time::Instant::now(),
        }
    }

    /// Compose a snapshot for `timeframe`: one series copy and one book
    /// `Arc` clone, each taken under its own lock. Never errors — an
    /// unconfigured timeframe (impossible after config validation) yields
    /// an empty series.
    pub fn read(&self, timeframe: Timeframe) -> MarketSnapshot {
        MarketSnapshot {
            symbol: self.symbol.clone(),
            timeframe,
            candles: self.aggregator.series(timeframe),
            orderbook: self.orderbook.snapshot(),
            as_of: Utc::now().timestamp_millis(),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
