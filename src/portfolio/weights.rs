//! Long-only, fully invested allocation vector.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PortfolioWeights(Vec<f64>);

impl PortfolioWeights {
    /// Equal weight `1/n` per asset.
    pub fn uniform(assets: usize) -> Self {
        if assets == 0 {
            return Self(Vec::new());
        }
        Self(vec![1.0 / assets as f64; assets])
    }

    /// Clamp to [0, 1] and renormalize to a unit sum. Falls back to uniform
    /// when nothing positive is left.
    pub(crate) fn normalized(raw: Vec<f64>) -> Self {
        let clamped: Vec<f64> = raw
            .into_iter()
            .map(|w| if w.is_finite() { w.clamp(0.0, 1.0) } else { 0.0 })
            .collect();
        let total: f64 = clamped.iter().sum();
        if total <= 0.0 {
            return Self::uniform(clamped.len());
        }
        Self(clamped.into_iter().map(|w| w / total).collect())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl std::fmt::Display for PortfolioWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|w| format!("{:.4}", w)).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_and_rescales() {
        let w = PortfolioWeights::normalized(vec![-0.1, 0.5, 1.5, f64::NAN]);
        assert!((w.as_slice().iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(w.as_slice()[0], 0.0);
        assert!((w.as_slice()[1] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(w.as_slice()[3], 0.0);
    }

    #[test]
    fn test_normalized_all_zero_is_uniform() {
        assert_eq!(PortfolioWeights::normalized(vec![0.0, 0.0]), PortfolioWeights::uniform(2));
    }
}
