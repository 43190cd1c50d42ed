//! Price histories of the assets capital can be allocated across.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::stats::{covariance_matrix, returns_matrix};
use crate::error::{EngineError, Result};

/// Named close-price series, one per asset, indexed by step.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "BTreeMap<String, Vec<Decimal>>")]
pub struct AssetUniverse {
    names: Vec<String>,
    prices: Vec<Vec<Decimal>>,
}

impl AssetUniverse {
    pub fn new(series: BTreeMap<String, Vec<Decimal>>) -> Result<Self> {
        if series.is_empty() {
            return Err(EngineError::invalid("asset universe is empty"));
        }
        if let Some((name, _)) = series.iter().find(|(_, p)| p.iter().any(|x| *x <= Decimal::ZERO)) {
            return Err(EngineError::invalid(format!(
                "asset {} has a non-positive price",
                name
            )));
        }
        let (names, prices): (Vec<String>, Vec<Vec<Decimal>>) = series.into_iter().unzip();
        Ok(Self { names, prices })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns matrix and covariance over the first `bars` prices of every
    /// asset.
    pub fn moments_until(&self, bars: usize) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let truncated: Vec<Vec<Decimal>> = self
            .prices
            .iter()
            .map(|p| p[..bars.min(p.len())].to_vec())
            .collect();
        let returns = returns_matrix(&truncated);
        let cov = if returns.len() < 2 {
            vec![vec![0.0; self.len()]; self.len()]
        } else {
            covariance_matrix(&returns)
        };
        (returns, cov)
    }

    /// Moments over the full history.
    pub fn moments(&self) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let longest = self.prices.iter().map(Vec::len).max().unwrap_or(0);
        self.moments_until(longest)
    }
}

impl TryFrom<BTreeMap<String, Vec<Decimal>>> for AssetUniverse {
    type Error = EngineError;

    fn try_from(series: BTreeMap<String, Vec<Decimal>>) -> Result<Self> {
        Self::new(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parses_named_series() {
        let universe: AssetUniverse = serde_json::from_str(
            r#"{"ETH/EUR": ["10", "11", "12"], "BTC/EUR": ["100", "99", "101"]}"#,
        )
        .unwrap();
        assert_eq!(universe.names(), &["BTC/EUR".to_string(), "ETH/EUR".to_string()]);

        let (returns, cov) = universe.moments();
        assert_eq!(returns.len(), 2);
        assert_eq!(cov.len(), 2);
        assert!((returns[0][1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_short_history_has_zero_covariance() {
        let mut series = BTreeMap::new();
        series.insert("A".to_string(), vec![dec!(1), dec!(2), dec!(3)]);
        series.insert("B".to_string(), vec![dec!(5), dec!(5), dec!(6)]);
        let universe = AssetUniverse::new(series).unwrap();

        let (returns, cov) = universe.moments_until(1);
        assert!(returns.is_empty());
        assert_eq!(cov, vec![vec![0.0; 2]; 2]);
    }

    #[test]
    fn test_rejects_bad_universe() {
        assert!(AssetUniverse::new(BTreeMap::new()).is_err());
        let mut series = BTreeMap::new();
        series.insert("A".to_string(), vec![dec!(1), dec!(0)]);
        assert!(AssetUniverse::new(series).is_err());
    }
}
