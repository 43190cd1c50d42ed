//! Trading logic: decision policy, multi-account environment, session runner
//! and pair selection.

mod environment;
mod policy;
mod selector;
mod session;

pub use environment::{TradingEnvironment, DEFAULT_FEE_RATE};
pub use selector::PairSelector;
pub use session::{Session, SessionSettings};
