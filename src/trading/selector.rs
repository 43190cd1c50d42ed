//! Ranks exchange pairs by intraday volatility and liquidity.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::PairTicker;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairSelector {
    /// Number of pairs to keep
    pub top_n: usize,

    /// Minimum `(high - low) / low`
    pub volatility_threshold: Decimal,

    /// Minimum quote volume
    pub min_volume: Decimal,

    /// Quote currency pairs must be denominated in
    pub quote: String,
}

impl Default for PairSelector {
    fn default() -> Self {
        Self {
            top_n: 5,
            volatility_threshold: dec!(0.02),
            min_volume: dec!(100000),
            quote: "EUR".to_string(),
        }
    }
}

impl PairSelector {
    /// Most volatile qualifying pairs, ties broken by volume. Returns
    /// `fallback` when nothing qualifies.
    pub fn select(&self, tickers: &[PairTicker], fallback: &[String]) -> Vec<String> {
        let mut candidates: Vec<(&PairTicker, Decimal)> = tickers
            .iter()
            .filter(|t| t.quoted_in(&self.quote))
            .map(|t| (t, t.volatility()))
            .filter(|(t, vol)| *vol >= self.volatility_threshold && t.quote_volume >= self.min_volume)
            .collect();

        if candidates.is_empty() {
            info!(quote = %self.quote, "No pair qualifies, using fallback list");
            return fallback.to_vec();
        }

        candidates.sort_by(|(a, va), (b, vb)| {
            vb.cmp(va).then_with(|| b.quote_volume.cmp(&a.quote_volume))
        });

        let selected: Vec<String> = candidates
            .into_iter()
            .take(self.top_n)
            .map(|(t, vol)| {
                debug!(symbol = %t.symbol, volatility = %vol, "Pair selected");
                t.symbol.clone()
            })
            .collect();

        info!(count = selected.len(), pairs = ?selected, "Pairs selected");
        selected
    }
}
