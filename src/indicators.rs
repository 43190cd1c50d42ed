//! Technical indicators appended to each observation.

use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage as Ema,
    RelativeStrengthIndex as Rsi, SimpleMovingAverage as Sma,
};
use ta::{DataItem, Next};

use crate::error::{EngineError, Result};
use crate::models::MarketStep;

/// Produces a fixed-width feature vector from the bars seen so far.
pub trait IndicatorSource: Send + Sync {
    /// Number of values `compute` always returns.
    fn width(&self) -> usize;

    /// Indicator values as of the last bar in `history`. Must return exactly
    /// `width()` values, zeros when there is not enough data.
    fn compute(&self, history: &[MarketStep]) -> Vec<f64>;
}

/// Short lookback periods suited to minute bars.
#[derive(Debug, Clone)]
pub struct IndicatorPeriods {
    pub trend: usize,
    pub rsi: usize,
    pub bands: usize,
    pub band_stddev: f64,
    pub atr: usize,
    pub volume_momentum: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            trend: 5,
            rsi: 7,
            bands: 5,
            band_stddev: 2.0,
            atr: 5,
            volume_momentum: 3,
        }
    }
}

/// Output layout of [`TechnicalIndicators`].
pub const INDICATOR_NAMES: [&str; 9] = [
    "sma",
    "ema",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "atr",
    "volatility_index",
    "rsi",
    "volume_momentum",
];

/// Index of the SMA value in [`INDICATOR_NAMES`].
pub const SMA_INDEX: usize = 0;

#[derive(Debug, Clone)]
pub struct TechnicalIndicators {
    sma: Sma,
    ema: Ema,
    bands: BollingerBands,
    atr: AverageTrueRange,
    rsi: Rsi,
    volume_momentum: usize,
}

fn ta_err<E: std::fmt::Debug>(e: E) -> EngineError {
    EngineError::invalid(format!("indicator period: {:?}", e))
}

impl TechnicalIndicators {
    pub fn new(periods: IndicatorPeriods) -> Result<Self> {
        if periods.volume_momentum == 0 {
            return Err(EngineError::invalid("volume momentum window must be positive"));
        }
        Ok(Self {
            sma: Sma::new(periods.trend).map_err(ta_err)?,
            ema: Ema::new(periods.trend).map_err(ta_err)?,
            bands: BollingerBands::new(periods.bands, periods.band_stddev).map_err(ta_err)?,
            atr: AverageTrueRange::new(periods.atr).map_err(ta_err)?,
            rsi: Rsi::new(periods.rsi).map_err(ta_err)?,
            volume_momentum: periods.volume_momentum,
        })
    }

    pub fn scalping() -> Result<Self> {
        Self::new(IndicatorPeriods::default())
    }

    /// Sum of the last `window` volume percentage changes.
    fn volume_momentum(&self, history: &[MarketStep]) -> f64 {
        let volumes: Vec<f64> = history.iter().map(|b| b.volume.to_f64().unwrap_or(0.0)).collect();
        let changes: Vec<f64> = volumes
            .windows(2)
            .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
            .collect();
        if changes.len() < self.volume_momentum {
            return 0.0;
        }
        changes[changes.len() - self.volume_momentum..].iter().sum()
    }
}

impl IndicatorSource for TechnicalIndicators {
    fn width(&self) -> usize {
        INDICATOR_NAMES.len()
    }

    fn compute(&self, history: &[MarketStep]) -> Vec<f64> {
        let Some(last) = history.last() else {
            return vec![0.0; self.width()];
        };

        // Fresh state per call; indicators are replayed over the whole history.
        let mut sma = self.sma.clone();
        let mut ema = self.ema.clone();
        let mut bands = self.bands.clone();
        let mut atr = self.atr.clone();
        let mut rsi = self.rsi.clone();

        let (mut sma_v, mut ema_v, mut rsi_v, mut atr_v) = (0.0, 0.0, 0.0, 0.0);
        let mut band_v = (0.0, 0.0, 0.0);

        for bar in history {
            let close = bar.close.to_f64().unwrap_or(0.0);
            sma_v = sma.next(close);
            ema_v = ema.next(close);
            rsi_v = rsi.next(close);
            let out = bands.next(close);
            band_v = (out.upper, out.average, out.lower);

            let item = DataItem::builder()
                .open(bar.open.to_f64().unwrap_or(close))
                .high(bar.high.to_f64().unwrap_or(close))
                .low(bar.low.to_f64().unwrap_or(close))
                .close(close)
                .volume(bar.volume.to_f64().unwrap_or(0.0))
                .build();
            if let Ok(item) = item {
                atr_v = atr.next(&item);
            }
        }

        let last_close = last.close.to_f64().unwrap_or(0.0);
        let volatility_index = if last_close > 0.0 { atr_v / last_close } else { 0.0 };

        let values = vec![
            sma_v,
            ema_v,
            band_v.0,
            band_v.1,
            band_v.2,
            atr_v,
            volatility_index,
            rsi_v,
            self.volume_momentum(history),
        ];
        values
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect()
    }
}
