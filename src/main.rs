// =============================================================================
// Marketview — Main Entry Point
// =============================================================================
//
// Seeds the candle rings from a one-shot historical backfill, spawns one
// long-lived WebSocket task per feed (klines, depth), and polls the shared
// market state on a fixed cadence from the consumer loop.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod market_data;
mod market_state;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::market_data::{backfill, feed};
use crate::market_state::MarketState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Marketview — Starting Up                          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = Config::load("marketview.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });

    // Override symbol and endpoints from env if available.
    if let Ok(symbol) = std::env::var("MARKETVIEW_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }
    if let Ok(endpoint) = std::env::var("MARKETVIEW_WS_ENDPOINT") {
        config.ws_endpoint = endpoint;
    }
    if let Ok(endpoint) = std::env::var("MARKETVIEW_REST_ENDPOINT") {
        config.rest_endpoint = endpoint;
    }

    // Fatal on an invalid configuration: the engine never starts serving
    // with a broken timeframe set or zero capacities.
    let timeframes = config.validate()?;

    let derived_labels: Vec<String> =
        timeframes.derived.iter().map(|tf| tf.to_string()).collect();
    info!(
        symbol = %config.symbol,
        base = %timeframes.base,
        derived = ?derived_labels,
        display = %timeframes.display,
        capacity = config.candle_capacity,
        depth_levels = config.depth_levels,
        "Configured market view"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(MarketState::new(
        config.symbol.clone(),
        timeframes.base,
        &timeframes.derived,
        config.candle_capacity,
        config.depth_levels,
    ));

    if std::env::var("MARKETVIEW_PAUSED").map(|v| v == "1").unwrap_or(false) {
        state.set_paused(true);
        info!("Consumer loop starting paused (MARKETVIEW_PAUSED=1)");
    }

    // ── 3. Historical backfill seed ──────────────────────────────────────
    // Any failure here degrades to an empty initial series; the live feed
    // fills in from there.
    match backfill::fetch_recent_candles(
        &config.rest_endpoint,
        &config.symbol,
        &config.base_interval,
        config.backfill_count,
    )
    .await
    {
        Ok(candles) => {
            info!(count = candles.len(), "Seeding series from backfill");
            state.aggregator.seed(candles);
        }
        Err(e) => {
            warn!(error = %e, "Backfill unavailable — starting with empty series");
        }
    }

    // ── 4. Spawn the feed tasks ──────────────────────────────────────────
    // Each task owns its own connection and reconnect loop; they run in
    // parallel so a stall on one socket never starves the other.
    let candle_url = config.kline_stream_url();
    let aggregator = state.aggregator.clone();
    tokio::spawn(async move {
        feed::run_candle_feed(candle_url, aggregator).await;
    });

    let depth_url = config.depth_stream_url();
    let orderbook = state.orderbook.clone();
    tokio::spawn(async move {
        feed::run_depth_feed(depth_url, orderbook).await;
    });

    info!("Feed tasks launched");

    // ── 5. Consumer loop ─────────────────────────────────────────────────
    // Fixed-cadence poll, fully decoupled from feed arrival timing. Stands
    // in for the rendering layer: each tick reads one composite snapshot
    // and logs a compact render summary.
    let consumer_state = state.clone();
    let display_tf = timeframes.display;
    let poll_interval = config.poll_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            if consumer_state.is_paused() {
                continue;
            }

            let snap = consumer_state.read(display_tf);
            info!(
                symbol = %snap.symbol,
                timeframe = %snap.timeframe,
                candles = snap.candles.len(),
                last_close = snap.candles.last().map(|c| c.close).unwrap_or(0.0),
                best_bid = snap.orderbook.best_bid().map(|l| l.price).unwrap_or(0.0),
                best_ask = snap.orderbook.best_ask().map(|l| l.price).unwrap_or(0.0),
                depth = snap.orderbook.bids.len() + snap.orderbook.asks.len(),
                "render tick"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");

    info!(
        uptime_secs = state.uptime_secs(),
        candle_anomalies = state.aggregator.sequence_anomalies(),
        depth_updates = state.orderbook.update_count(),
        "Marketview shut down complete."
    );
    Ok(())
}
