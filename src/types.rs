// =============================================================================
// Shared types used across the market view engine
// =============================================================================

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const MS_PER_SEC: i64 = 1_000;
const MS_PER_MIN: i64 = 60 * MS_PER_SEC;
const MS_PER_HOUR: i64 = 60 * MS_PER_MIN;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// A fixed candle duration, parsed from venue-style labels (`1m`, `5m`,
/// `15m`, `1h`, `4h`, `1d`, ...).
///
/// The set of timeframes the engine serves is a closed enumeration fixed at
/// startup; anything unparsable or not a whole multiple of the base interval
/// is rejected by config validation before the engine starts serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    ms: i64,
}

impl Timeframe {
    /// Duration of one bucket in milliseconds.
    pub fn ms(&self) -> i64 {
        self.ms
    }

    /// Start of the bucket containing `ts_ms` (epoch-aligned).
    pub fn bucket_start(&self, ts_ms: i64) -> i64 {
        ts_ms - ts_ms.rem_euclid(self.ms)
    }

    /// Whether this timeframe is an exact integer multiple of `base`.
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        base.ms > 0 && self.ms >= base.ms && self.ms % base.ms == 0
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (digits, unit) = s.split_at(s.len().saturating_sub(1));
        let n: i64 = digits
            .parse()
            .with_context(|| format!("invalid timeframe label: {s:?}"))?;
        if n <= 0 {
            bail!("timeframe must be positive: {s:?}");
        }
        let unit_ms = match unit {
            "s" => MS_PER_SEC,
            "m" => MS_PER_MIN,
            "h" => MS_PER_HOUR,
            "d" => MS_PER_DAY,
            _ => bail!("unknown timeframe unit in {s:?} (expected s/m/h/d)"),
        };
        Ok(Self { ms: n * unit_ms })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n, unit) = if self.ms % MS_PER_DAY == 0 {
            (self.ms / MS_PER_DAY, "d")
        } else if self.ms % MS_PER_HOUR == 0 {
            (self.ms / MS_PER_HOUR, "h")
        } else if self.ms % MS_PER_MIN == 0 {
            (self.ms / MS_PER_MIN, "m")
        } else {
            (self.ms / MS_PER_SEC, "s")
        };
        write!(f, "{n}{unit}")
    }
}

impl TryFrom<String> for Timeframe {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_labels() {
        assert_eq!("1m".parse::<Timeframe>().unwrap().ms(), 60_000);
        assert_eq!("5m".parse::<Timeframe>().unwrap().ms(), 300_000);
        assert_eq!("1h".parse::<Timeframe>().unwrap().ms(), 3_600_000);
        assert_eq!("4h".parse::<Timeframe>().unwrap().ms(), 14_400_000);
        assert_eq!("1d".parse::<Timeframe>().unwrap().ms(), 86_400_000);
        assert_eq!("30s".parse::<Timeframe>().unwrap().ms(), 30_000);
    }

    #[test]
    fn rejects_bad_labels() {
        assert!("".parse::<Timeframe>().is_err());
        assert!("m".parse::<Timeframe>().is_err());
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("-5m".parse::<Timeframe>().is_err());
        assert!("10x".parse::<Timeframe>().is_err());
        assert!("1.5h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn display_roundtrips() {
        for label in ["1m", "5m", "15m", "1h", "4h", "1d", "45s"] {
            let tf: Timeframe = label.parse().unwrap();
            assert_eq!(tf.to_string(), label);
        }
    }

    #[test]
    fn bucket_alignment() {
        let tf: Timeframe = "1m".parse().unwrap();
        assert_eq!(tf.bucket_start(0), 0);
        assert_eq!(tf.bucket_start(59_999), 0);
        assert_eq!(tf.bucket_start(60_000), 60_000);
        assert_eq!(tf.bucket_start(61_234), 60_000);

        let hour: Timeframe = "1h".parse().unwrap();
        assert_eq!(hour.bucket_start(3_599_999), 0);
        assert_eq!(hour.bucket_start(3_600_000), 3_600_000);
    }

    #[test]
    fn multiple_of_base() {
        let base: Timeframe = "1m".parse().unwrap();
        assert!("1m".parse::<Timeframe>().unwrap().is_multiple_of(base));
        assert!("5m".parse::<Timeframe>().unwrap().is_multiple_of(base));
        assert!("1h".parse::<Timeframe>().unwrap().is_multiple_of(base));
        assert!(!"30s".parse::<Timeframe>().unwrap().is_multiple_of(base));
        assert!(!"90s".parse::<Timeframe>().unwrap().is_multiple_of(base));
    }

    #[test]
    fn serde_uses_labels() {
        let tf: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(tf.ms(), 900_000);
        assert_eq!(serde_json::to_string(&tf).unwrap(), "\"15m\"");
    }
}
