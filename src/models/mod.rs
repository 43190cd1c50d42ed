//! Data models for bars, accounts, actions, and performance records.

mod account;
mod action;
pub(crate) mod bar;
mod record;
mod ticker;

pub use account::{AccountId, AccountLedger, AccountStatus};
pub use action::Action;
pub use bar::{MarketFeed, MarketStep, BAR_FIELDS};
pub use record::{AccountSnapshot, PerformanceRecord};
pub use ticker::PairTicker;
