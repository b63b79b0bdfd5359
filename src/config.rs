// =============================================================================
// Configuration — engine settings fixed at process start
// =============================================================================
//
// All fields carry `#[serde(default)]` so that an older config file missing
// new fields still deserialises correctly. A missing file falls back to
// defaults with a warning; an invalid configuration (zero capacity, bad
// timeframe label, derived timeframe not a multiple of the base) is fatal
// before the engine starts serving.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_ws_endpoint() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_rest_endpoint() -> String {
    "https://api.binance.com".to_string()
}

fn default_base_interval() -> String {
    "1m".to_string()
}

fn default_timeframes() -> Vec<String> {
    vec!["5m".to_string(), "15m".to_string(), "1h".to_string()]
}

fn default_display_timeframe() -> String {
    "1m".to_string()
}

fn default_candle_capacity() -> usize {
    500
}

fn default_depth_levels() -> usize {
    20
}

fn default_backfill_count() -> usize {
    200
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

// =============================================================================
// Config
// =============================================================================

/// Top-level configuration for the market view engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading pair the engine watches.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// WebSocket endpoint for the live streams.
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,

    /// REST endpoint for the historical backfill.
    #[serde(default = "default_rest_endpoint")]
    pub rest_endpoint: String,

    /// Base candle interval label delivered by the feed (e.g. "1m").
    #[serde(default = "default_base_interval")]
    pub base_interval: String,

    /// Higher timeframe labels derived locally from the base interval.
    /// Each must be an exact integer multiple of the base.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    /// Timeframe the consumer loop reads each tick. Must be the base
    /// interval or one of `timeframes`.
    #[serde(default = "default_display_timeframe")]
    pub display_timeframe: String,

    /// Candles retained per series (base and each derived ring).
    #[serde(default = "default_candle_capacity")]
    pub candle_capacity: usize,

    /// Order-book levels retained per side.
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,

    /// Finalized candles requested from the backfill at startup.
    #[serde(default = "default_backfill_count")]
    pub backfill_count: usize,

    /// Consumer poll cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            ws_endpoint: default_ws_endpoint(),
            rest_endpoint: default_rest_endpoint(),
            base_interval: default_base_interval(),
            timeframes: default_timeframes(),
            display_timeframe: default_display_timeframe(),
            candle_capacity: default_candle_capacity(),
            depth_levels: default_depth_levels(),
            backfill_count: default_backfill_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Timeframe set resolved and checked by [`Config::validate`]. The engine
/// serves exactly these timeframes; `read` requests outside the set cannot
/// occur after startup.
#[derive(Debug, Clone)]
pub struct Timeframes {
    pub base: Timeframe,
    pub derived: Vec<Timeframe>,
    pub display: Timeframe,
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist or cannot be parsed, returns an error so
    /// the caller can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            timeframes = ?config.timeframes,
            "config loaded"
        );

        Ok(config)
    }

    /// Validate the configuration and resolve its timeframe labels.
    ///
    /// Fatal at startup: zero capacities, an unparsable timeframe label, a
    /// derived timeframe that is not an exact multiple of the base, or a
    /// display timeframe outside the configured set all abort before the
    /// engine starts serving.
    pub fn validate(&self) -> Result<Timeframes> {
        if self.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if self.candle_capacity == 0 {
            bail!("candle_capacity must be greater than zero");
        }
        if self.depth_levels == 0 {
            bail!("depth_levels must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }

        let base: Timeframe = self
            .base_interval
            .parse()
            .with_context(|| format!("invalid base_interval {:?}", self.base_interval))?;

        let mut derived = Vec::with_capacity(self.timeframes.len());
        for label in &self.timeframes {
            let tf: Timeframe = label
                .parse()
                .with_context(|| format!("invalid timeframe {label:?}"))?;
            if !tf.is_multiple_of(base) {
                bail!(
                    "timeframe {label} is not an exact multiple of the base interval {}",
                    self.base_interval
                );
            }
            derived.push(tf);
        }

        let display: Timeframe = self
            .display_timeframe
            .parse()
            .with_context(|| format!("invalid display_timeframe {:?}", self.display_timeframe))?;
        if display != base && !derived.contains(&display) {
            bail!(
                "display_timeframe {} is not in the configured timeframe set",
                self.display_timeframe
            );
        }

        Ok(Timeframes {
            base,
            derived,
            display,
        })
    }

    /// Kline stream URL, e.g. `wss://.../ws/btcusdt@kline_1m`.
    pub fn kline_stream_url(&self) -> String {
        let lower = self.symbol.to_lowercase();
        format!("{}/ws/{lower}@kline_{}", self.ws_endpoint, self.base_interval)
    }

    /// Partial-depth stream URL, e.g. `wss://.../ws/btcusdt@depth20@100ms`.
    pub fn depth_stream_url(&self) -> String {
        let lower = self.symbol.to_lowercase();
        format!("{}/ws/{lower}@depth20@100ms", self.ws_endpoint)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
