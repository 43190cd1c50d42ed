//! 24h ticker summary used to rank tradable pairs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairTicker {
    /// Exchange symbol, e.g. "BTC/EUR"
    pub symbol: String,

    pub high: Decimal,
    pub low: Decimal,

    /// 24h volume in the quote currency
    #[serde(default)]
    pub quote_volume: Decimal,
}

impl PairTicker {
    /// `(high - low) / low`, zero when the low is not positive.
    pub fn volatility(&self) -> Decimal {
        if self.low > Decimal::ZERO {
            (self.high - self.low) / self.low
        } else {
            Decimal::ZERO
        }
    }

    pub fn quoted_in(&self, quote: &str) -> bool {
        self.symbol
            .rsplit_once('/')
            .map(|(_, q)| q.eq_ignore_ascii_case(quote))
            .unwrap_or(false)
    }
}
