// =============================================================================
// Historical Backfill — one-shot REST fetch of recent finalized candles
// =============================================================================
//
// Invoked once at startup to seed the base series before the live feed takes
// over. Any failure here is non-fatal: the engine starts with an empty or
// partial series and fills in from the stream.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::market_data::candles::Candle;
use crate::market_data::feed::parse_string_f64;

/// Fetch up to `count` recent finalized candles for `symbol` at `interval`,
/// oldest first.
#[instrument(skip(rest_endpoint), name = "backfill::fetch")]
pub async fn fetch_recent_candles(
    rest_endpoint: &str,
    symbol: &str,
    interval: &str,
    count: usize,
) -> Result<Vec<Candle>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build backfill HTTP client")?;

    let url = format!(
        "{rest_endpoint}/api/v3/klines?symbol={symbol}&interval={interval}&limit={count}"
    );

    let resp = client
        .get(&url)
        .send()
        .await
        .context("GET /api/v3/klines request failed")?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .context("failed to parse klines response")?;

    if !status.is_success() {
        anyhow::bail!("klines endpoint returned {status}: {body}");
    }

    let rows = body.as_array().context("klines response is not an array")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(parse_kline_row(row)?);
    }

    debug!(candles = out.len(), "backfill fetched");
    Ok(out)
}

/// Parse one kline row:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
/// Backfilled candles are final by definition.
fn parse_kline_row(row: &serde_json::Value) -> Result<Candle> {
    let bucket_start = row[0].as_i64().context("kline row missing open time")?;
    Ok(Candle {
        bucket_start,
        open: parse_string_f64(&row[1], "open")?,
        high: parse_string_f64(&row[2], "high")?,
        low: parse_string_f64(&row[3], "low")?,
        close: parse_string_f64(&row[4], "close")?,
        volume: parse_string_f64(&row[5], "volume")?,
        is_final: true,
    })
}
