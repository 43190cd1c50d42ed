//! Position sizing, stop placement, adaptive risk and drawdown tracking.
//!
//! One `RiskManager` exists per account. It owns the account's running
//! balance extremes and its ACTIVE/HALTED status; balances are always passed
//! in, never read from the ledger.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::RiskProfile;
use crate::error::{EngineError, Result};
use crate::models::AccountStatus;

/// Lower bound of the performance-adjusted risk fraction.
pub const MIN_ADJUSTED_RISK: Decimal = dec!(0.02);

/// Upper bound of the performance-adjusted risk fraction.
pub const MAX_ADJUSTED_RISK: Decimal = dec!(0.05);

/// How strongly relative performance moves the risk fraction.
const PERFORMANCE_SENSITIVITY: Decimal = dec!(0.1);

/// Position size multiplier in scalping mode.
const SCALPING_SIZE_FACTOR: Decimal = dec!(0.7);

/// Volatility ceiling multiplier in scalping mode.
const SCALPING_CEILING_FACTOR: Decimal = dec!(1.5);

#[derive(Debug, Clone)]
pub struct RiskManager {
    profile: RiskProfile,
    current_balance: Decimal,
    max_balance_seen: Decimal,
    min_balance_seen: Decimal,
    status: AccountStatus,
}

impl RiskManager {
    pub fn new(profile: RiskProfile) -> Result<Self> {
        profile.validate()?;
        let initial = profile.initial_balance;
        Ok(Self {
            profile,
            current_balance: initial,
            max_balance_seen: initial,
            min_balance_seen: initial,
            status: AccountStatus::Active,
        })
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_halted(&self) -> bool {
        self.status == AccountStatus::Halted
    }

    /// Replace the per-trade risk fraction.
    pub fn set_max_risk(&mut self, max_risk: Decimal) -> Result<()> {
        let candidate = RiskProfile {
            max_risk,
            ..self.profile.clone()
        };
        candidate.validate()?;
        self.profile = candidate;
        info!(max_risk = %max_risk, "Max risk updated");
        Ok(())
    }

    /// Size such that a move of `stop_loss_distance` costs `max_risk` of the
    /// balance, scaled down in scalping mode.
    ///
    /// The result is in the same unit the distance is expressed in: a
    /// fractional distance yields a notional, a price distance yields units.
    pub fn calculate_position_size(
        &self,
        current_balance: Decimal,
        stop_loss_distance: Decimal,
    ) -> Result<Decimal> {
        if stop_loss_distance <= Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "stop-loss distance must be positive, got {}",
                stop_loss_distance
            )));
        }
        if current_balance < Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "balance must not be negative, got {}",
                current_balance
            )));
        }

        let risk_amount = current_balance * self.profile.max_risk;
        let size = risk_amount / stop_loss_distance;

        if self.profile.scalping_mode {
            Ok(size * SCALPING_SIZE_FACTOR)
        } else {
            Ok(size)
        }
    }

    /// Protective stop on the side opposite the forecast direction.
    pub fn dynamic_stop_loss(&self, entry_price: Decimal, predicted_price: Decimal) -> Decimal {
        if predicted_price > entry_price {
            entry_price * (Decimal::ONE - self.profile.trailing_stop_pct)
        } else {
            entry_price * (Decimal::ONE + self.profile.trailing_stop_pct)
        }
    }

    /// Profit-trailing level on the side the forecast points to.
    pub fn trailing_stop(&self, entry_price: Decimal, predicted_price: Decimal) -> Decimal {
        if predicted_price > entry_price {
            entry_price * (Decimal::ONE + self.profile.trailing_stop_pct)
        } else {
            entry_price * (Decimal::ONE - self.profile.trailing_stop_pct)
        }
    }

    /// Risk fraction moved by relative performance, clamped to
    /// [`MIN_ADJUSTED_RISK`, `MAX_ADJUSTED_RISK`].
    pub fn adjust_risk_based_on_performance(&self, current_balance: Decimal) -> Decimal {
        let initial = self.profile.initial_balance;
        let performance = (current_balance - initial) / initial;
        let adjusted = self.profile.max_risk + performance * PERFORMANCE_SENSITIVITY;
        let clamped = adjusted.clamp(MIN_ADJUSTED_RISK, MAX_ADJUSTED_RISK);

        debug!(performance = %performance, risk = %clamped, "Risk adjusted for performance");
        clamped
    }

    /// Fractional decline of `balance` from the high-water mark.
    pub fn drawdown(&self, balance: Decimal) -> Decimal {
        if self.max_balance_seen <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.max_balance_seen - balance) / self.max_balance_seen).max(Decimal::ZERO)
    }

    /// Record `current_balance` and report whether the drawdown limit is
    /// breached. A breach moves the account to HALTED; it stays there until
    /// [`RiskManager::resume`].
    pub fn check_drawdown(&mut self, current_balance: Decimal) -> Result<bool> {
        if current_balance < Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "balance must not be negative, got {}",
                current_balance
            )));
        }

        self.current_balance = current_balance;
        if current_balance < self.min_balance_seen {
            self.min_balance_seen = current_balance;
        }
        if current_balance > self.max_balance_seen {
            self.max_balance_seen = current_balance;
        }

        let drawdown = self.drawdown(current_balance);
        let breached = drawdown > self.profile.max_drawdown;

        if breached && self.status == AccountStatus::Active {
            warn!(
                balance = %self.current_balance,
                peak = %self.max_balance_seen,
                trough = %self.min_balance_seen,
                drawdown_pct = %(drawdown * dec!(100)).round_dp(2),
                limit_pct = %(self.profile.max_drawdown * dec!(100)).round_dp(2),
                "Drawdown limit breached, halting trading"
            );
            self.status = AccountStatus::Halted;
        }

        Ok(breached)
    }

    /// Explicitly return a halted account to ACTIVE, rebasing the running
    /// extremes at `balance`.
    pub fn resume(&mut self, balance: Decimal) -> Result<()> {
        if balance <= Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "cannot resume trading with balance {}",
                balance
            )));
        }
        self.current_balance = balance;
        self.max_balance_seen = balance;
        self.min_balance_seen = balance;
        self.status = AccountStatus::Active;
        info!(balance = %balance, "Trading resumed");
        Ok(())
    }

    /// Largest notional a BUY may spend: the position size that risks
    /// `max_risk` over a `trailing_stop_pct` adverse move, capped at the
    /// available cash.
    pub fn max_investment(&self, balance: Decimal) -> Result<Decimal> {
        let notional = self.calculate_position_size(balance, self.profile.trailing_stop_pct)?;
        Ok(notional.min(balance))
    }

    /// Per-trade cash budget: balance times the performance-adjusted risk
    /// fraction, where performance is measured on `equity`.
    pub fn risk_limit(&self, balance: Decimal, equity: Decimal) -> Result<Decimal> {
        if balance < Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "balance must not be negative, got {}",
                balance
            )));
        }
        Ok(balance * self.adjust_risk_based_on_performance(equity))
    }

    /// Portfolio volatility ceiling for the optimizer.
    pub fn volatility_ceiling(&self, balance: Decimal) -> Decimal {
        let ceiling = self.adjust_risk_based_on_performance(balance);
        if self.profile.scalping_mode {
            ceiling * SCALPING_CEILING_FACTOR
        } else {
            ceiling
        }
    }
}
