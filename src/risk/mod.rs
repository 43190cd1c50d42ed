//! Per-account risk management: configuration and the risk manager.

mod manager;
mod profile;

pub use manager::RiskManager;
pub use profile::RiskProfile;
