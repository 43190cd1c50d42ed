//! Return series and covariance helpers for the optimizer.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;

/// Simple period-over-period returns of a price series. Pairs whose previous
/// price is not positive are skipped.
pub fn pct_change(prices: &[Decimal]) -> Vec<f64> {
    prices
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].to_f64()?;
            let curr = w[1].to_f64()?;
            if prev > 0.0 {
                Some((curr - prev) / prev)
            } else {
                None
            }
        })
        .collect()
}

/// Row-major returns matrix (one row per period, one column per asset).
/// Series of different lengths are aligned on their most recent returns.
pub fn returns_matrix(price_series: &[Vec<Decimal>]) -> Vec<Vec<f64>> {
    let columns: Vec<Vec<f64>> = price_series.iter().map(|p| pct_change(p)).collect();
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);

    (0..rows)
        .map(|t| {
            columns
                .iter()
                .map(|col| col[col.len() - rows + t])
                .collect()
        })
        .collect()
}

fn column(returns: &[Vec<f64>], j: usize) -> Vec<f64> {
    returns.iter().map(|row| row[j]).collect()
}

/// Mean return of every column.
pub fn mean_returns(returns: &[Vec<f64>], assets: usize) -> Vec<f64> {
    (0..assets).map(|j| column(returns, j).mean()).collect()
}

/// Sample covariance matrix of the returns columns. Needs at least two rows;
/// with fewer every entry is zero.
pub fn covariance_matrix(returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let assets = returns.first().map(Vec::len).unwrap_or(0);
    let mut cov = vec![vec![0.0; assets]; assets];
    if returns.len() < 2 {
        return cov;
    }

    let columns: Vec<Vec<f64>> = (0..assets).map(|j| column(returns, j)).collect();
    for i in 0..assets {
        for j in i..assets {
            let c = columns[i].clone().covariance(columns[j].clone());
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}
