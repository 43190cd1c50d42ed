//! Long-only Sharpe-ratio maximization under a volatility ceiling.
//!
//! Projected gradient descent on the negative Sharpe ratio. Every iterate is
//! kept on the unit simplex; candidates whose volatility exceeds the ceiling
//! score `+inf` and are never accepted. Any failure (no data, no feasible
//! start, no convergence) yields equal weights.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, warn};

use super::stats::mean_returns;
use super::PortfolioWeights;
use crate::error::{EngineError, Result};
use crate::risk::RiskManager;

const DEFAULT_MAX_ITERATIONS: usize = 1000;
const DEFAULT_TOLERANCE: f64 = 1e-10;
const SYMMETRY_TOLERANCE: f64 = 1e-9;
const INITIAL_STEP: f64 = 0.1;
const MAX_STEP: f64 = 1.0;
const MIN_STEP: f64 = 1e-12;
const PROJECTION_ROUNDS: usize = 100;
const ZERO_EXCESS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    returns: Vec<Vec<f64>>,
    cov: Vec<Vec<f64>>,
    risk_free_rate: f64,
    max_allowed_risk: f64,
    max_iterations: usize,
    tolerance: f64,
}

impl PortfolioOptimizer {
    /// `returns` is row-major (periods x assets); `cov` is the N x N
    /// covariance of those columns.
    pub fn new(
        returns: Vec<Vec<f64>>,
        cov: Vec<Vec<f64>>,
        risk_free_rate: f64,
        max_allowed_risk: f64,
    ) -> Result<Self> {
        let n = cov.len();
        if n == 0 {
            return Err(EngineError::invalid("covariance matrix is empty"));
        }
        for (i, row) in cov.iter().enumerate() {
            if row.len() != n {
                return Err(EngineError::invalid(format!(
                    "covariance row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    n
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::invalid(format!(
                    "covariance row {} is not finite",
                    i
                )));
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let scale = cov[i][j].abs().max(cov[j][i].abs()).max(1.0);
                if (cov[i][j] - cov[j][i]).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(EngineError::invalid(format!(
                        "covariance matrix is not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        if let Some(bad) = returns.iter().position(|row| row.len() != n) {
            return Err(EngineError::invalid(format!(
                "returns row {} has {} columns, expected {}",
                bad,
                returns[bad].len(),
                n
            )));
        }
        if !risk_free_rate.is_finite() {
            return Err(EngineError::invalid("risk-free rate is not finite"));
        }
        if !max_allowed_risk.is_finite() || max_allowed_risk <= 0.0 {
            return Err(EngineError::invalid(format!(
                "volatility ceiling must be positive, got {}",
                max_allowed_risk
            )));
        }

        Ok(Self {
            returns,
            cov,
            risk_free_rate,
            max_allowed_risk,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    /// Optimizer whose volatility ceiling comes from the account's risk
    /// manager at `balance`.
    pub fn for_account(
        returns: Vec<Vec<f64>>,
        cov: Vec<Vec<f64>>,
        risk_free_rate: f64,
        risk: &RiskManager,
        balance: Decimal,
    ) -> Result<Self> {
        let ceiling = risk
            .volatility_ceiling(balance)
            .to_f64()
            .ok_or_else(|| EngineError::invalid("volatility ceiling out of range"))?;
        Self::new(returns, cov, risk_free_rate, ceiling)
    }

    pub fn asset_count(&self) -> usize {
        self.cov.len()
    }

    pub fn max_allowed_risk(&self) -> f64 {
        self.max_allowed_risk
    }

    /// Maximize the Sharpe ratio; equal weights on failure.
    pub fn optimize(&self) -> PortfolioWeights {
        match self.try_optimize() {
            Ok(weights) => {
                debug!(weights = %weights, "Portfolio optimized");
                weights
            }
            Err(e) => {
                warn!(error = %e, "Optimization failed, using equal weights");
                PortfolioWeights::uniform(self.asset_count())
            }
        }
    }

    /// Like [`optimize`](Self::optimize) but surfaces the failure.
    pub fn try_optimize(&self) -> Result<PortfolioWeights> {
        let n = self.asset_count();
        if n == 1 {
            return Ok(PortfolioWeights::normalized(vec![1.0]));
        }
        if self.returns.is_empty() {
            return Err(EngineError::OptimizationFailure(
                "no return observations".to_string(),
            ));
        }

        let mu = mean_returns(&self.returns, n);
        if mu.iter().any(|m| !m.is_finite()) {
            return Err(EngineError::OptimizationFailure(
                "mean returns are not finite".to_string(),
            ));
        }

        let mut w = self.feasible_start(&mu)?;
        let mut fw = self.objective(&w, &mu);
        let mut step = INITIAL_STEP;

        for iteration in 0..self.max_iterations {
            let Some(grad) = self.gradient(&w, &mu) else {
                // Zero-variance iterate with a finite objective is stationary.
                return Ok(PortfolioWeights::normalized(w));
            };

            let mut accepted = None;
            while step >= MIN_STEP {
                let moved: Vec<f64> = w.iter().zip(&grad).map(|(wi, gi)| wi - step * gi).collect();
                let candidate = project_simplex(&moved);
                let fc = self.objective(&candidate, &mu);
                if fc.is_finite() && fc < fw {
                    accepted = Some((candidate, fc));
                    break;
                }
                step *= 0.5;
            }

            let Some((next, f_next)) = accepted else {
                debug!(iteration, "No descent step left, converged");
                return Ok(PortfolioWeights::normalized(w));
            };

            let shift: f64 = next.iter().zip(&w).map(|(a, b)| (a - b).abs()).sum();
            let gain = fw - f_next;
            w = next;
            fw = f_next;
            step = (step * 1.5).min(MAX_STEP);

            if gain < self.tolerance && shift < self.tolerance.sqrt() {
                debug!(iteration, sharpe = -fw, "Converged");
                return Ok(PortfolioWeights::normalized(w));
            }
        }

        Err(EngineError::OptimizationFailure(format!(
            "did not converge within {} iterations",
            self.max_iterations
        )))
    }

    fn portfolio_return(&self, w: &[f64], mu: &[f64]) -> f64 {
        w.iter().zip(mu).map(|(a, b)| a * b).sum()
    }

    fn cov_times(&self, w: &[f64]) -> Vec<f64> {
        self.cov
            .iter()
            .map(|row| row.iter().zip(w).map(|(c, x)| c * x).sum())
            .collect()
    }

    fn variance(&self, w: &[f64]) -> f64 {
        let sigma_w = self.cov_times(w);
        w.iter().zip(&sigma_w).map(|(a, b)| a * b).sum::<f64>().max(0.0)
    }

    /// Negative Sharpe ratio, `+inf` when the volatility ceiling is exceeded
    /// or the ratio is undefined.
    fn objective(&self, w: &[f64], mu: &[f64]) -> f64 {
        let volatility = self.variance(w).sqrt();
        if volatility > self.max_allowed_risk {
            return f64::INFINITY;
        }
        let excess = self.portfolio_return(w, mu) - self.risk_free_rate;
        if volatility == 0.0 {
            return if excess.abs() < ZERO_EXCESS {
                0.0
            } else {
                f64::INFINITY
            };
        }
        -excess / volatility
    }

    /// Gradient of the negative Sharpe ratio; `None` at zero variance.
    fn gradient(&self, w: &[f64], mu: &[f64]) -> Option<Vec<f64>> {
        let sigma_w = self.cov_times(w);
        let variance: f64 = w.iter().zip(&sigma_w).map(|(a, b)| a * b).sum();
        if variance <= 0.0 {
            return None;
        }
        let volatility = variance.sqrt();
        let excess = self.portfolio_return(w, mu) - self.risk_free_rate;
        Some(
            mu.iter()
                .zip(&sigma_w)
                .map(|(m, s)| -(m / volatility - excess * s / (variance * volatility)))
                .collect(),
        )
    }

    /// Equal weights when feasible, otherwise the best feasible single asset.
    fn feasible_start(&self, mu: &[f64]) -> Result<Vec<f64>> {
        let n = self.asset_count();
        let uniform = vec![1.0 / n as f64; n];
        if self.objective(&uniform, mu).is_finite() {
            return Ok(uniform);
        }

        (0..n)
            .map(|i| {
                let mut vertex = vec![0.0; n];
                vertex[i] = 1.0;
                let score = self.objective(&vertex, mu);
                (vertex, score)
            })
            .filter(|(_, score)| score.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(vertex, _)| vertex)
            .ok_or_else(|| {
                EngineError::OptimizationFailure(format!(
                    "no allocation satisfies volatility ceiling {}",
                    self.max_allowed_risk
                ))
            })
    }
}

/// Euclidean projection onto `{w : sum w = 1, 0 <= w_i <= 1}` by bisection on
/// the shift `tau` with `sum clamp(v_i - tau, 0, 1) = 1`.
fn project_simplex(v: &[f64]) -> Vec<f64> {
    let clipped_sum = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(0.0, 1.0)).sum() };

    let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = v.iter().copied().fold(f64::INFINITY, f64::min);
    let mut lo = min - 1.0;
    let mut hi = max;

    for _ in 0..PROJECTION_ROUNDS {
        let mid = 0.5 * (lo + hi);
        if clipped_sum(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let tau = 0.5 * (lo + hi);
    let projected: Vec<f64> = v.iter().map(|x| (x - tau).clamp(0.0, 1.0)).collect();
    let total: f64 = projected.iter().sum();
    if total > 0.0 {
        projected.into_iter().map(|x| x / total).collect()
    } else {
        vec![1.0 / v.len() as f64; v.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::stats::covariance_matrix;
    use crate::risk::RiskProfile;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn optimizer(returns: Vec<Vec<f64>>, rf: f64, ceiling: f64) -> PortfolioOptimizer {
        let cov = covariance_matrix(&returns);
        PortfolioOptimizer::new(returns, cov, rf, ceiling).unwrap()
    }

    fn assert_on_simplex(w: &PortfolioWeights) {
        let sum: f64 = w.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum = {}", sum);
        assert!(w.as_slice().iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_single_asset_is_fully_invested() {
        let opt = optimizer(vec![vec![0.01], vec![-0.02], vec![0.03]], 0.0, 1.0);
        assert_eq!(opt.optimize().as_slice(), &[1.0]);
    }

    #[test]
    fn test_no_observations_falls_back_to_uniform() {
        let opt = PortfolioOptimizer::new(vec![], vec![vec![0.0; 3]; 3], 0.01, 0.05).unwrap();
        assert!(matches!(opt.try_optimize(), Err(EngineError::OptimizationFailure(_))));
        assert_eq!(opt.optimize(), PortfolioWeights::uniform(3));
    }

    #[test]
    fn test_prefers_higher_sharpe_asset() {
        // Perfectly correlated, equal volatility, opposite drift.
        let returns = vec![
            vec![0.02, 0.0],
            vec![0.0, -0.02],
            vec![0.02, 0.0],
            vec![0.0, -0.02],
        ];
        let w = optimizer(returns, 0.0, 1.0).optimize();
        assert_on_simplex(&w);
        assert!(w.as_slice()[0] > 0.99, "weights = {}", w);
    }

    #[test]
    fn test_diversifies_uncorrelated_assets() {
        // Same drift, partially correlated noise: the mix beats either leg.
        let returns = vec![
            vec![0.03, 0.01],
            vec![-0.01, 0.01],
            vec![0.03, 0.03],
            vec![-0.01, -0.01],
            vec![0.01, 0.03],
            vec![0.01, -0.01],
        ];
        let w = optimizer(returns, 0.0, 1.0).optimize();
        assert_on_simplex(&w);
        assert!(w.as_slice().iter().all(|x| *x > 0.2), "weights = {}", w);
    }

    #[test]
    fn test_ceiling_below_every_allocation_falls_back() {
        let returns = vec![vec![0.05, -0.04], vec![-0.05, 0.04], vec![0.06, -0.03]];
        let opt = optimizer(returns, 0.0, 1e-6);
        assert!(opt.try_optimize().is_err());
        assert_eq!(opt.optimize(), PortfolioWeights::uniform(2));
    }

    #[test]
    fn test_result_respects_ceiling() {
        let returns = vec![
            vec![0.10, 0.001],
            vec![-0.06, 0.002],
            vec![0.12, 0.001],
            vec![-0.04, 0.002],
        ];
        let ceiling = 0.03;
        let opt = optimizer(returns, 0.0, ceiling);
        let w = opt.try_optimize().unwrap();
        assert_on_simplex(&w);
        assert!(opt.variance(w.as_slice()).sqrt() <= ceiling + 1e-9);
    }

    #[test]
    fn test_zero_variance_objective() {
        let flat = optimizer(vec![vec![0.0, 0.0], vec![0.0, 0.0]], 0.0, 1.0);
        assert_eq!(flat.objective(&[0.5, 0.5], &[0.0, 0.0]), 0.0);

        let drifting = optimizer(vec![vec![0.01, 0.01], vec![0.01, 0.01]], 0.0, 1.0);
        assert_eq!(drifting.objective(&[0.5, 0.5], &[0.01, 0.01]), f64::INFINITY);
    }

    #[test]
    fn test_iteration_limit_is_failure() {
        let returns = vec![
            vec![0.03, 0.01],
            vec![-0.01, 0.01],
            vec![0.03, 0.03],
            vec![-0.01, -0.01],
        ];
        let mut opt = optimizer(returns, 0.0, 1.0);
        opt.max_iterations = 0;
        assert!(opt.try_optimize().is_err());
        assert_eq!(opt.optimize(), PortfolioWeights::uniform(2));
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(PortfolioOptimizer::new(vec![], vec![], 0.0, 0.1).is_err());
        assert!(PortfolioOptimizer::new(vec![], vec![vec![1.0, 0.0]], 0.0, 0.1).is_err());
        assert!(PortfolioOptimizer::new(
            vec![],
            vec![vec![1.0, 0.2], vec![0.3, 1.0]],
            0.0,
            0.1
        )
        .is_err());
        assert!(PortfolioOptimizer::new(
            vec![vec![0.1]],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            0.0,
            0.1
        )
        .is_err());
        assert!(PortfolioOptimizer::new(vec![], vec![vec![1.0]], 0.0, 0.0).is_err());
    }

    #[test]
    fn test_ceiling_from_risk_manager() {
        let rm = RiskManager::new(RiskProfile::scalping(dec!(100))).unwrap();
        let opt = PortfolioOptimizer::for_account(vec![], vec![vec![0.0]], 0.0, &rm, dec!(100))
            .unwrap();
        assert!((opt.max_allowed_risk() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_projection_clamps_onto_simplex() {
        let p = project_simplex(&[2.0, -1.0, 0.5]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((p[0] - 1.0).abs() < 1e-6);
        assert!(p[1].abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_weights_stay_on_simplex(
            rows in prop::collection::vec(prop::collection::vec(-0.05f64..0.05, 3), 0..20),
            ceiling in 0.0001f64..0.2,
        ) {
            let cov = if rows.is_empty() { vec![vec![0.0; 3]; 3] } else { covariance_matrix(&rows) };
            let opt = PortfolioOptimizer::new(rows, cov, 0.001, ceiling).unwrap();
            let w = opt.optimize();
            prop_assert_eq!(w.as_slice().len(), 3);
            prop_assert!((w.as_slice().iter().sum::<f64>() - 1.0).abs() < 1e-6);
            prop_assert!(w.as_slice().iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }
}
