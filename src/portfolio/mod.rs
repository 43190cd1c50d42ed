//! Capital allocation across assets.

mod allocation;
mod optimizer;
pub mod stats;
mod universe;
mod weights;

pub use allocation::{allocate_concurrently, AllocationRequest};
pub use optimizer::PortfolioOptimizer;
pub use universe::AssetUniverse;
pub use weights::PortfolioWeights;
