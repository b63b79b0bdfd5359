// =============================================================================
// Candle Aggregator — incremental multi-timeframe aggregation
// =============================================================================
//
// Consumes base-interval candle updates and maintains one ring buffer per
// configured timeframe. Higher timeframes are never recomputed from a full
// rescan: each derived series carries a mutable accumulator for its current
// (possibly partial) bucket, folded in O(1) per base update.
//
// Thread safety: one parking_lot::RwLock around the whole candle state. The
// lock is held only across in-memory mutation or copy-out, never across I/O.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::market_data::candles::{Candle, CandleSeries, SeriesOutcome};
use crate::types::Timeframe;

/// In-progress higher-timeframe bucket.
///
/// Volume needs two fields because the venue reports a base bucket's volume
/// cumulatively: `vol_done` is the sum over completed base buckets in this
/// span, `vol_live` is the latest report for the in-progress base bucket.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    bucket_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    vol_done: f64,
    vol_live: f64,
}

impl Accumulator {
    fn open(bucket_start: i64, base: &Candle) -> Self {
        Self {
            bucket_start,
            open: base.open,
            high: base.high,
            low: base.low,
            close: base.close,
            vol_done: 0.0,
            vol_live: base.volume,
        }
    }

    /// Fold a repeated report for the current base bucket.
    fn fold_tail(&mut self, base: &Candle) {
        self.high = self.high.max(base.high);
        self.low = self.low.min(base.low);
        self.close = base.close;
        self.vol_live = base.volume;
    }

    /// Absorb a new base bucket that falls inside this span. The previous
    /// base bucket is complete, so its volume moves into `vol_done`.
    fn absorb_new_base(&mut self, base: &Candle) {
        self.vol_done += self.vol_live;
        self.vol_live = base.volume;
        self.high = self.high.max(base.high);
        self.low = self.low.min(base.low);
        self.close = base.close;
    }

    fn seal(&self) -> Candle {
        Candle {
            bucket_start: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.vol_done + self.vol_live,
            is_final: true,
        }
    }

    fn as_live_candle(&self) -> Candle {
        Candle {
            is_final: false,
            ..self.seal()
        }
    }
}

/// One derived timeframe: its sealed ring plus the open accumulator.
#[derive(Debug)]
struct DerivedSeries {
    tf: Timeframe,
    series: CandleSeries,
    open_bucket: Option<Accumulator>,
}

impl DerivedSeries {
    fn new(tf: Timeframe, capacity: usize) -> Self {
        Self {
            tf,
            series: CandleSeries::new(capacity),
            open_bucket: None,
        }
    }

    /// A new base bucket was appended: extend the current span, or seal it
    /// and open the next one. A gap that jumps past the span simply seals
    /// the accumulator over whatever base candles actually arrived.
    fn on_new_base(&mut self, base: &Candle) {
        let span = self.tf.bucket_start(base.bucket_start);
        if let Some(acc) = &mut self.open_bucket {
            if acc.bucket_start == span {
                acc.absorb_new_base(base);
                return;
            }
            let sealed = acc.seal();
            self.series.apply(sealed);
        }
        self.open_bucket = Some(Accumulator::open(span, base));
    }

    /// The in-progress base bucket was upserted: fold it into the open
    /// accumulator. No accumulator means the span was already eagerly
    /// sealed — the seal is the bucket's last word.
    fn on_tail_update(&mut self, base: &Candle) {
        let span = self.tf.bucket_start(base.bucket_start);
        if let Some(acc) = &mut self.open_bucket {
            if acc.bucket_start == span {
                acc.fold_tail(base);
            }
        }
    }

    /// A final base bucket that ends this span seals it immediately instead
    /// of waiting one base interval for the next bucket to arrive.
    fn maybe_eager_seal(&mut self, base: &Candle, base_ms: i64) {
        let tf_ms = self.tf.ms();
        if let Some(acc) = &self.open_bucket {
            if base.bucket_start + base_ms == acc.bucket_start + tf_ms {
                let sealed = acc.seal();
                self.series.apply(sealed);
                self.open_bucket = None;
            }
        }
    }

    /// Sealed ring plus the live accumulator, trimmed to capacity.
    fn snapshot(&self) -> Vec<Candle> {
        let mut v = self.series.to_vec();
        if let Some(acc) = &self.open_bucket {
            v.push(acc.as_live_candle());
            if v.len() > self.series.capacity() {
                v.remove(0);
            }
        }
        v
    }
}

struct AggregatorInner {
    base: CandleSeries,
    derived: Vec<DerivedSeries>,
}

/// Multi-timeframe candle state for one symbol.
pub struct CandleAggregator {
    base_tf: Timeframe,
    inner: RwLock<AggregatorInner>,
    sequence_anomalies: AtomicU64,
}

impl CandleAggregator {
    /// Build an aggregator serving `base_tf` plus every timeframe in
    /// `derived`. The base timeframe and duplicates are filtered out of the
    /// derived set; callers validate multiples before constructing.
    pub fn new(base_tf: Timeframe, derived: &[Timeframe], capacity: usize) -> Self {
        let mut tfs: Vec<Timeframe> = derived.iter().copied().filter(|tf| *tf != base_tf).collect();
        tfs.sort();
        tfs.dedup();

        Self {
            base_tf,
            inner: RwLock::new(AggregatorInner {
                base: CandleSeries::new(capacity),
                derived: tfs
                    .into_iter()
                    .map(|tf| DerivedSeries::new(tf, capacity))
                    .collect(),
            }),
            sequence_anomalies: AtomicU64::new(0),
        }
    }

    /// Apply one base-interval candle update.
    pub fn on_candle_update(&self, candle: Candle) {
        let mut inner = self.inner.write();
        match inner.base.apply(candle) {
            SeriesOutcome::DroppedStale => {
                self.sequence_anomalies.fetch_add(1, Ordering::Relaxed);
                debug!(
                    bucket_start = candle.bucket_start,
                    "out-of-order candle update dropped"
                );
                return;
            }
            SeriesOutcome::UpdatedTail => {
                for d in &mut inner.derived {
                    d.on_tail_update(&candle);
                }
            }
            SeriesOutcome::Appended => {
                for d in &mut inner.derived {
                    d.on_new_base(&candle);
                }
            }
        }

        if candle.is_final {
            let base_ms = self.base_tf.ms();
            for d in &mut inner.derived {
                d.maybe_eager_seal(&candle, base_ms);
            }
        }
    }

    /// Replay an ordered batch of finalized candles (the backfill seed)
    /// through the ordinary update path, so the derived rings are built by
    /// the same code the live feed exercises.
    pub fn seed(&self, candles: Vec<Candle>) {
        for c in candles {
            self.on_candle_update(Candle { is_final: true, ..c });
        }
    }

    /// Defensive copy of one timeframe's series, consistent at a single
    /// instant. Derived copies include the live (in-progress) bucket as the
    /// last element. An unconfigured timeframe yields an empty series —
    /// unreachable after config validation.
    pub fn series(&self, tf: Timeframe) -> Vec<Candle> {
        let inner = self.inner.read();
        if tf == self.base_tf {
            return inner.base.to_vec();
        }
        match inner.derived.iter().find(|d| d.tf == tf) {
            Some(d) => d.snapshot(),
            None => {
                debug!(timeframe = %tf, "series requested for unconfigured timeframe");
                Vec::new()
            }
        }
    }

    /// Count of dropped out-of-order/duplicate-older updates.
    pub fn sequence_anomalies(&self) -> u64 {
        self.sequence_anomalies.load(Ordering::Relaxed)
    }
}
