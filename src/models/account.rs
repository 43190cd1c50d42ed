//! Account identity, trading status and the cash/position ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Opaque account identifier, validated non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(EngineError::invalid("account id must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Built-in ids; callers pass non-empty literals.
    pub(crate) fn named(id: &'static str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether an account may open new exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    #[default]
    Active,
    /// Drawdown limit breached; BUY is refused until an explicit resume.
    Halted,
}

/// Cash and position state of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLedger {
    /// Free cash
    pub balance: Decimal,

    /// Units of the traded asset held
    pub shares_held: Decimal,

    /// balance + shares_held * last price
    pub net_worth: Decimal,
}

impl AccountLedger {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            shares_held: Decimal::ZERO,
            net_worth: initial_balance,
        }
    }

    /// Mark the position to `price` and refresh net worth.
    pub fn mark(&mut self, price: Decimal) {
        self.net_worth = self.balance + self.position_value(price);
    }

    /// Start a new episode: the previous net worth becomes the cash balance.
    pub fn rollover(&mut self) {
        self.balance = self.net_worth;
        self.shares_held = Decimal::ZERO;
    }

    /// Market value of the held position at `price`.
    pub fn position_value(&self, price: Decimal) -> Decimal {
        self.shares_held * price
    }
}
