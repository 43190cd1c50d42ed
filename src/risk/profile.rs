//! Per-account risk configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Risk budget for a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    /// Fraction of balance risked per trade (0.0 to 1.0)
    pub max_risk: Decimal,

    /// Drawdown from the high-water mark that halts trading (0.0 to 1.0)
    pub max_drawdown: Decimal,

    /// Offset used for stop and trailing levels (0.0 to 1.0)
    pub trailing_stop_pct: Decimal,

    /// Shrinks position sizes and widens the volatility ceiling
    pub scalping_mode: bool,

    /// Starting capital and reference point for performance
    pub initial_balance: Decimal,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            max_risk: dec!(0.02),          // 2% per trade
            max_drawdown: dec!(0.1),       // Halt at 10% drawdown
            trailing_stop_pct: dec!(0.03), // 3% stop offset
            scalping_mode: false,
            initial_balance: dec!(100),
        }
    }
}

impl RiskProfile {
    pub fn scalping(initial_balance: Decimal) -> Self {
        Self {
            scalping_mode: true,
            initial_balance,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_risk <= Decimal::ZERO || self.max_risk > Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "max_risk must be in (0, 1], got {}",
                self.max_risk
            )));
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown >= Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "max_drawdown must be in (0, 1), got {}",
                self.max_drawdown
            )));
        }
        if self.trailing_stop_pct <= Decimal::ZERO || self.trailing_stop_pct >= Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "trailing_stop_pct must be in (0, 1), got {}",
                self.trailing_stop_pct
            )));
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "initial_balance must be positive, got {}",
                self.initial_balance
            )));
        }
        Ok(())
    }
}
