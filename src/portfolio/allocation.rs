//! Runs one optimizer per account on tokio's blocking pool.

use futures::future::join_all;
use tracing::{error, info};

use super::{PortfolioOptimizer, PortfolioWeights};
use crate::models::AccountId;

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub account: AccountId,
    pub optimizer: PortfolioOptimizer,
}

/// Optimize every request concurrently. Results come back in request order;
/// a task that panics yields equal weights for its account only.
pub async fn allocate_concurrently(
    requests: Vec<AllocationRequest>,
) -> Vec<(AccountId, PortfolioWeights)> {
    let tasks = requests.into_iter().map(|req| {
        let account = req.account;
        let assets = req.optimizer.asset_count();
        let optimizer = req.optimizer;
        let handle = tokio::task::spawn_blocking(move || optimizer.optimize());
        async move {
            let weights = match handle.await {
                Ok(weights) => weights,
                Err(e) => {
                    error!(account = %account, error = %e, "Allocation task failed");
                    PortfolioWeights::uniform(assets)
                }
            };
            info!(account = %account, weights = %weights, "Allocation ready");
            (account, weights)
        }
    });

    join_all(tasks).await
}
