//! Market bar model: one OHLCV step of the feed driving the environment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Number of raw bar fields placed at the front of every observation.
pub const BAR_FIELDS: usize = 5;

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStep {
    /// Bar open time
    pub timestamp: DateTime<Utc>,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,

    /// Traded volume in the base asset
    #[serde(default)]
    pub volume: Decimal,
}

impl MarketStep {
    /// Intrabar range relative to the low, `(high - low) / low`.
    pub fn range_pct(&self) -> Decimal {
        if self.low <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.high - self.low) / self.low
    }

    /// Raw numeric fields in observation order: open, high, low, close, volume.
    pub fn features(&self) -> [f64; BAR_FIELDS] {
        [
            self.open.to_f64().unwrap_or(0.0),
            self.high.to_f64().unwrap_or(0.0),
            self.low.to_f64().unwrap_or(0.0),
            self.close.to_f64().unwrap_or(0.0),
            self.volume.to_f64().unwrap_or(0.0),
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.close <= Decimal::ZERO || self.low <= Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "bar at {} has a non-positive price",
                self.timestamp
            )));
        }
        if self.high < self.low {
            return Err(EngineError::invalid(format!(
                "bar at {} has high below low",
                self.timestamp
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "bar at {} has negative volume",
                self.timestamp
            )));
        }
        Ok(())
    }
}

/// A finite, ordered, validated series of bars.
#[derive(Debug, Clone)]
pub struct MarketFeed {
    bars: Vec<MarketStep>,
}

impl MarketFeed {
    /// Build a feed. Needs at least two bars so that one step can complete,
    /// and timestamps must be strictly increasing.
    pub fn new(bars: Vec<MarketStep>) -> Result<Self> {
        if bars.len() < 2 {
            return Err(EngineError::invalid(format!(
                "market feed needs at least 2 bars, got {}",
                bars.len()
            )));
        }
        for bar in &bars {
            bar.validate()?;
        }
        if bars.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(EngineError::invalid("market feed timestamps must be strictly increasing"));
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn get(&self, step: usize) -> Option<&MarketStep> {
        self.bars.get(step)
    }

    /// All bars up to and including `step`.
    pub fn history(&self, step: usize) -> &[MarketStep] {
        let end = (step + 1).min(self.bars.len());
        &self.bars[..end]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    /// Flat bars, one minute apart.
    pub(crate) fn flat_bars(n: usize, price: Decimal) -> Vec<MarketStep> {
        bars_from_closes(&vec![price; n])
    }

    pub(crate) fn bars_from_closes(closes: &[Decimal]) -> Vec<MarketStep> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| MarketStep {
                timestamp: start + Duration::minutes(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(10),
            })
            .collect()
    }

    #[test]
    fn test_feed_rejects_short_series() {
        let err = MarketFeed::new(flat_bars(1, dec!(100))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_feed_rejects_unordered_timestamps() {
        let mut bars = flat_bars(3, dec!(100));
        bars.swap(0, 2);
        assert!(MarketFeed::new(bars).is_err());
    }

    #[test]
    fn test_history_includes_current_step() {
        let feed = MarketFeed::new(flat_bars(4, dec!(100))).unwrap();
        assert_eq!(feed.history(0).len(), 1);
        assert_eq!(feed.history(2).len(), 3);
        assert_eq!(feed.history(10).len(), 4);
    }

    #[test]
    fn test_range_pct() {
        let mut bar = flat_bars(1, dec!(100)).remove(0);
        bar.high = dec!(105);
        bar.low = dec!(100);
        assert_eq!(bar.range_pct(), dec!(0.05));
    }
}
