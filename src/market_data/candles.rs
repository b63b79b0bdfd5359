// =============================================================================
// Candle & CandleSeries — bounded OHLCV ring buffer for one timeframe
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A single OHLCV candle.
///
/// Identity within a series is `bucket_start`. A candle is mutable only while
/// it is the series tail; it is finalized when a newer bucket begins or when
/// the feed flags it final.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start time, epoch milliseconds.
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Whether the venue (or a subsequent bucket) has sealed this candle.
    pub is_final: bool,
}

/// Outcome of applying an update to a [`CandleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesOutcome {
    /// A new bucket was appended; the previous tail (if any) is now final.
    Appended,
    /// The in-progress tail bucket was updated in place.
    UpdatedTail,
    /// The update's bucket is older than the tail — dropped. History is
    /// append-only; only the tail ever mutates.
    DroppedStale,
}

/// Time-ordered, fixed-capacity candle sequence for one timeframe.
///
/// Invariants: `bucket_start` strictly increasing, length <= capacity,
/// oldest evicted first. Eviction and tail updates are O(1).
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Apply an incoming candle update.
    ///
    /// * Same bucket as the tail: upsert in place. `open` stays at its
    ///   first-seen value for the bucket; high/low/close/volume take the
    ///   latest report (the venue resends the full in-progress bar).
    /// * Strictly newer bucket: the tail is finalized and the new candle is
    ///   appended, evicting the oldest entry at capacity.
    /// * Older bucket: dropped.
    pub fn apply(&mut self, candle: Candle) -> SeriesOutcome {
        match self.candles.back_mut() {
            None => {
                self.push(candle);
                SeriesOutcome::Appended
            }
            Some(tail) if candle.bucket_start == tail.bucket_start => {
                tail.high = candle.high;
                tail.low = candle.low;
                tail.close = candle.close;
                tail.volume = candle.volume;
                tail.is_final = tail.is_final || candle.is_final;
                SeriesOutcome::UpdatedTail
            }
            Some(tail) if candle.bucket_start > tail.bucket_start => {
                tail.is_final = true;
                self.push(candle);
                SeriesOutcome::Appended
            }
            Some(_) => SeriesOutcome::DroppedStale,
        }
    }

    /// Append unconditionally (caller has already established ordering),
    /// trimming the front at capacity.
    fn push(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
    }

    /// Defensive copy of the whole series, oldest first.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bucket_start: i64, close: f64, is_final: bool) -> Candle {
        Candle {
            bucket_start,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            is_final,
        }
    }

    #[test]
    fn capacity_is_enforced_fifo() {
        let mut series = CandleSeries::new(3);
        for i in 0..5 {
            assert_eq!(
                series.apply(sample(i * 60_000, 100.0 + i as f64, true)),
                SeriesOutcome::Appended
            );
        }
        assert_eq!(series.len(), 3);
        let buckets: Vec<i64> = series.to_vec().iter().map(|c| c.bucket_start).collect();
        assert_eq!(buckets, vec![120_000, 180_000, 240_000]);
    }

    #[test]
    fn bucket_starts_strictly_increasing() {
        let mut series = CandleSeries::new(10);
        series.apply(sample(0, 100.0, true));
        series.apply(sample(60_000, 101.0, false));
        series.apply(sample(60_000, 102.0, false));
        series.apply(sample(120_000, 103.0, false));

        let v = series.to_vec();
        for pair in v.windows(2) {
            assert!(pair[0].bucket_start < pair[1].bucket_start);
        }
    }

    #[test]
    fn tail_upsert_keeps_open_takes_latest_rest() {
        let mut series = CandleSeries::new(10);
        series.apply(Candle {
            bucket_start: 0,
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
            volume: 1.0,
            is_final: false,
        });
        let outcome = series.apply(Candle {
            bucket_start: 0,
            open: 99.0, // ignored — open is fixed at first-seen
            high: 12.5,
            low: 9.5,
            close: 12.0,
            volume: 3.0,
            is_final: false,
        });
        assert_eq!(outcome, SeriesOutcome::UpdatedTail);
        assert_eq!(series.len(), 1);

        let tail = *series.last().unwrap();
        assert_eq!(tail.open, 10.0);
        assert_eq!(tail.high, 12.5);
        assert_eq!(tail.low, 9.5);
        assert_eq!(tail.close, 12.0);
        assert_eq!(tail.volume, 3.0);
    }

    #[test]
    fn append_finalizes_previous_tail() {
        let mut series = CandleSeries::new(3);
        series.apply(sample(0, 10.0, false)); // T0 open
        series.apply(Candle {
            close: 12.0,
            ..sample(0, 10.0, false)
        }); // T0 in-progress update
        series.apply(sample(60_000, 13.0, false)); // T1 begins

        let v = series.to_vec();
        assert_eq!(v.len(), 2);
        assert!(v[0].is_final, "T0 must be sealed once T1 begins");
        assert_eq!(v[0].close, 12.0);
        assert!(!v[1].is_final);
        assert_eq!(v[1].bucket_start, 60_000);
    }

    #[test]
    fn stale_buckets_are_dropped() {
        let mut series = CandleSeries::new(10);
        series.apply(sample(0, 100.0, true));
        series.apply(sample(60_000, 101.0, true));
        series.apply(sample(120_000, 102.0, false));

        // Duplicate of an already-finalized bucket and an older bucket.
        assert_eq!(series.apply(sample(60_000, 999.0, true)), SeriesOutcome::DroppedStale);
        assert_eq!(series.apply(sample(0, 999.0, true)), SeriesOutcome::DroppedStale);

        let v = series.to_vec();
        assert_eq!(v.len(), 3);
        assert_eq!(v[1].close, 101.0, "history must never be rewritten");
    }

    #[test]
    fn final_flag_sticks_on_tail() {
        let mut series = CandleSeries::new(10);
        series.apply(sample(0, 100.0, true));
        series.apply(sample(0, 101.0, false));
        assert!(series.last().unwrap().is_final);
    }
}
