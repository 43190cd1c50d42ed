//! Per-step performance record handed to the journal.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AccountId, AccountLedger, AccountStatus, Action};

/// State of one account after a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub net_worth: Decimal,
    pub shares_held: Decimal,

    /// Action requested for this step
    pub action: Action,

    /// Whether the requested action was refused (BUY while halted)
    #[serde(default)]
    pub refused: bool,

    #[serde(default)]
    pub status: AccountStatus,
}

impl AccountSnapshot {
    pub fn capture(ledger: &AccountLedger, action: Action, refused: bool, status: AccountStatus) -> Self {
        Self {
            balance: ledger.balance,
            net_worth: ledger.net_worth,
            shares_held: ledger.shares_held,
            action,
            refused,
            status,
        }
    }
}

/// One record per completed step, keyed by the step index that was traded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Episode number, starting at 1
    pub episode: u32,

    /// Step index the actions were applied at
    pub step: usize,

    pub accounts: BTreeMap<AccountId, AccountSnapshot>,
}
