pub mod aggregator;
pub mod backfill;
pub mod candles;
pub mod feed;
pub mod orderbook;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use aggregator::CandleAggregator;
pub use candles::Candle;
pub use orderbook::{OrderBookSnapshot, OrderBookStore};
