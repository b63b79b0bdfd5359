// =============================================================================
// Feed Connections — WebSocket lifecycle for the candle and depth streams
// =============================================================================
//
// One long-lived task per feed. Each task owns exactly one connection at a
// time and loops `Disconnected -> Connecting -> Connected -> (error)
// Disconnected` forever, with full-jitter exponential backoff between
// attempts. Transitions are driven by connection-level outcomes only; a
// single malformed message is logged and skipped without tearing the
// connection down. Events lost during an outage are not recovered — the gap
// shows up as absent buckets downstream.
//
// Decoded events are applied synchronously, in receipt order, into the
// shared aggregator/store. Those calls are pure in-memory mutations behind
// short-lived locks; the socket is never awaited while a lock is held.
// =============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::Rng;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::market_data::aggregator::CandleAggregator;
use crate::market_data::candles::Candle;
use crate::market_data::orderbook::{DepthUpdate, OrderBookStore};

/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Connection state machine
// ---------------------------------------------------------------------------

/// Per-feed connection state. Events are delivered only while `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff with full jitter: each delay is drawn uniformly from
/// `[0, min(cap, base * 2^attempt)]`. Unbounded attempts — the feeds retry
/// forever. Reset on every successful connect.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current jitter ceiling: `min(cap, base * 2^attempt)`.
    pub fn max_delay(&self) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.cap)
    }

    /// Draw the next delay and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling_ms = self.max_delay().as_millis() as u64;
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

// ---------------------------------------------------------------------------
// Candle feed
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    decode_failures: u64,
}

/// Connect to the kline WebSocket stream and feed candle updates into
/// `aggregator`, reconnecting with backoff forever. Runs until the process
/// shuts down.
pub async fn run_candle_feed(url: String, aggregator: Arc<CandleAggregator>) {
    let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
    let mut reconnects: u64 = 0;

    loop {
        info!(url = %url, state = %FeedState::Connecting, "connecting to candle WebSocket");
        match connect_async(&url).await {
            Ok((ws_stream, _response)) => {
                info!(state = %FeedState::Connected, "candle WebSocket connected");
                backoff.reset();

                let mut stats = FrameStats::default();
                let (_write, mut read) = ws_stream.split();
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => match parse_candle_message(&text) {
                            Ok(candle) => {
                                stats.frames += 1;
                                aggregator.on_candle_update(candle);
                            }
                            Err(e) => {
                                stats.decode_failures += 1;
                                warn!(error = %e, "failed to parse candle message");
                            }
                        },
                        // Ping/Pong/Binary/Close — tungstenite answers pings itself.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "candle WebSocket read error");
                            break;
                        }
                        None => {
                            warn!("candle WebSocket stream ended");
                            break;
                        }
                    }
                }

                warn!(
                    frames = stats.frames,
                    decode_failures = stats.decode_failures,
                    reconnects,
                    "candle WebSocket disconnected"
                );
            }
            Err(e) => {
                warn!(error = %e, "candle WebSocket connect failed");
            }
        }

        reconnects += 1;
        let delay = backoff.next_delay();
        info!(
            state = %FeedState::Disconnected,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "candle feed backing off before reconnect"
        );
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Depth feed
// ---------------------------------------------------------------------------

/// Connect to the partial-depth WebSocket stream and feed full snapshots
/// into `store`, reconnecting with backoff forever.
pub async fn run_depth_feed(url: String, store: Arc<OrderBookStore>) {
    let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
    let mut reconnects: u64 = 0;

    loop {
        info!(url = %url, state = %FeedState::Connecting, "connecting to depth WebSocket");
        match connect_async(&url).await {
            Ok((ws_stream, _response)) => {
                info!(state = %FeedState::Connected, "depth WebSocket connected");
                backoff.reset();

                let mut stats = FrameStats::default();
                let (_write, mut read) = ws_stream.split();
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => match parse_depth_message(&text) {
                            Ok(update) => {
                                stats.frames += 1;
                                store.on_depth_update(update);
                            }
                            Err(e) => {
                                stats.decode_failures += 1;
                                warn!(error = %e, "failed to parse depth message");
                            }
                        },
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "depth WebSocket read error");
                            break;
                        }
                        None => {
                            warn!("depth WebSocket stream ended");
                            break;
                        }
                    }
                }

                warn!(
                    frames = stats.frames,
                    decode_failures = stats.decode_failures,
                    reconnects,
                    "depth WebSocket disconnected"
                );
            }
            Err(e) => {
                warn!(error = %e, "depth WebSocket connect failed");
            }
        }

        reconnects += 1;
        let delay = backoff.next_delay();
        info!(
            state = %FeedState::Disconnected,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "depth feed backing off before reconnect"
        );
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Wire parsing
// ---------------------------------------------------------------------------

/// Parse a kline message into a candle update.
///
/// Supports both the combined-stream envelope and the direct single-stream
/// payload:
/// ```json
/// { "stream": "btcusdt@kline_1m", "data": { "k": { ... } } }
/// { "e": "kline", "s": "BTCUSDT", "k": { ... } }
/// ```
pub fn parse_candle_message(text: &str) -> Result<Candle> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse candle JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = data.get("k").context("missing kline payload k")?;

    let bucket_start = k["t"].as_i64().context("missing field k.t")?;
    let open = parse_string_f64(&k["o"], "k.o")?;
    let high = parse_string_f64(&k["h"], "k.h")?;
    let low = parse_string_f64(&k["l"], "k.l")?;
    let close = parse_string_f64(&k["c"], "k.c")?;
    let volume = parse_string_f64(&k["v"], "k.v")?;
    let is_final = k["x"].as_bool().context("missing field k.x")?;

    Ok(Candle {
        bucket_start,
        open,
        high,
        low,
        close,
        volume,
        is_final,
    })
}

/// Parse a partial-depth message into a full snapshot update.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
pub fn parse_depth_message(text: &str) -> Result<DepthUpdate> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    Ok(DepthUpdate {
        bids: parse_levels(&data["bids"], "bids")?,
        asks: parse_levels(&data["asks"], "asks")?,
    })
}

fn parse_levels(value: &serde_json::Value, name: &str) -> Result<Vec<(f64, f64)>> {
    let arr = value
        .as_array()
        .with_context(|| format!("missing field {name}"))?;

    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let price = parse_string_f64(&level[0], name)?;
        let volume = parse_string_f64(&level[1], name)?;
        out.push((price, volume));
    }
    Ok(out)
}

/// Helper: the venue sends numeric values as JSON strings inside payloads.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_candle_single_stream() {
        let json = r#"{
            "e": "kline",
            "s": "BTCUSDT",
            "k": {
                "t": 1700000000000,
                "T": 1700000059999,
                "i": "1m",
                "o": "37000.00",
                "h": "37050.00",
                "l": "36990.00",
                "c": "37020.00",
                "v": "123.456",
                "x": false
            }
        }"#;
        let candle = parse_candle_message(json).expect("should parse");
        assert_eq!(candle.bucket_start, 1_700_000_000_000);
        assert!((candle.open - 37_000.0).abs() < f64::EPSILON);
        assert!((candle.close - 37_020.0).abs() < f64::EPSILON);
        assert!((candle.volume - 123.456).abs() < f64::EPSILON);
        assert!(!candle.is_final);
    }

    #[test]
    fn parse_candle_combined_stream_envelope() {
        let json = r#"{
            "stream": "btcusdt@kline_1m",
            "data": {
                "e": "kline",
                "s": "BTCUSDT",
                "k": {
                    "t": 1700000000000,
                    "o": "100", "h": "110", "l": "90", "c": "105",
                    "v": "7", "x": true
                }
            }
        }"#;
        let candle = parse_candle_message(json).expect("should parse");
        assert_eq!(candle.high, 110.0);
        assert!(candle.is_final);
    }

    #[test]
    fn parse_candle_rejects_missing_fields() {
        assert!(parse_candle_message(r#"{"k": {"t": 1}}"#).is_err());
        assert!(parse_candle_message(r#"{"foo": "bar"}"#).is_err());
        assert!(parse_candle_message("not json").is_err());
    }

    #[test]
    fn parse_depth_full_levels() {
        let json = r#"{
            "lastUpdateId": 12345,
            "bids": [["37000.00", "1.5"], ["36999.00", "2.0"]],
            "asks": [["37001.00", "1.2"]]
        }"#;
        let update = parse_depth_message(json).expect("should parse");
        assert_eq!(update.bids, vec![(37_000.0, 1.5), (36_999.0, 2.0)]);
        assert_eq!(update.asks, vec![(37_001.0, 1.2)]);
    }

    #[test]
    fn parse_depth_rejects_malformed_levels() {
        assert!(parse_depth_message(r#"{"bids": [["x", "1"]], "asks": []}"#).is_err());
        assert!(parse_depth_message(r#"{"bids": "nope", "asks": []}"#).is_err());
        assert!(parse_depth_message("{}").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.max_delay(), Duration::from_secs(1));

        let mut ceilings = Vec::new();
        for _ in 0..8 {
            ceilings.push(backoff.max_delay());
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30), "jitter never exceeds cap");
        }
        assert_eq!(ceilings[1], Duration::from_secs(2));
        assert_eq!(ceilings[2], Duration::from_secs(4));
        assert_eq!(ceilings[5], Duration::from_secs(30), "capped at 30s");
        assert_eq!(ceilings[7], Duration::from_secs(30));
    }

    #[test]
    fn backoff_resets_after_success() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempt(), 5);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.max_delay(), Duration::from_secs(1));
    }
}
