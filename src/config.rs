//! Engine configuration loaded from a JSON file.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::models::AccountId;
use crate::risk::RiskProfile;
use crate::trading::{SessionSettings, DEFAULT_FEE_RATE};

/// One trading account and its risk budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: AccountId,

    #[serde(flatten)]
    pub risk: RiskProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fee charged on each side of a trade (0.0 to 1.0)
    pub fee_rate: Decimal,

    /// Per-period risk-free rate used in the Sharpe ratio
    pub risk_free_rate: f64,

    /// Bars averaged into the market risk level
    pub risk_window: usize,

    /// Rebalance allocations every N steps (disabled when absent)
    pub rebalance_every: Option<usize>,

    /// Episode loss fraction that triggers reduced per-trade risk
    pub loss_cutoff: Decimal,

    /// Per-trade risk for accounts past the loss cutoff
    pub reduced_max_risk: Decimal,

    /// Resume halted accounts at the start of each new episode
    pub resume_halted: bool,

    pub accounts: Vec<AccountConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let account = |id: &'static str, risk: RiskProfile| AccountConfig {
            id: AccountId::named(id),
            risk,
        };
        Self {
            fee_rate: DEFAULT_FEE_RATE,
            risk_free_rate: 0.01,
            risk_window: 5,
            rebalance_every: None,
            loss_cutoff: dec!(0.10),
            reduced_max_risk: dec!(0.01),
            resume_halted: false,
            accounts: vec![
                account("danny", RiskProfile::scalping(dec!(1000))),
                account(
                    "giuseppe",
                    RiskProfile {
                        initial_balance: dec!(1000),
                        ..Default::default()
                    },
                ),
            ],
        }
    }
}

impl EngineConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!(path = %path.display(), accounts = config.accounts.len(), "Configuration loaded");
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.accounts.is_empty() {
            return Err(EngineError::invalid("at least one account is required"));
        }
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(&account.id) {
                return Err(EngineError::DuplicateAccount(account.id.clone()));
            }
            account.risk.validate().map_err(|e| {
                EngineError::invalid(format!("account {}: {}", account.id, e))
            })?;
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::invalid("risk_free_rate must be finite"));
        }
        if self.risk_window == 0 {
            return Err(EngineError::invalid("risk_window must be positive"));
        }
        if self.rebalance_every == Some(0) {
            return Err(EngineError::invalid("rebalance_every must be positive"));
        }
        if self.loss_cutoff <= Decimal::ZERO || self.loss_cutoff >= Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "loss_cutoff must be in (0, 1), got {}",
                self.loss_cutoff
            )));
        }
        if self.reduced_max_risk <= Decimal::ZERO || self.reduced_max_risk > Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "reduced_max_risk must be in (0, 1], got {}",
                self.reduced_max_risk
            )));
        }
        Ok(())
    }

    pub fn account_profiles(&self) -> Vec<(AccountId, RiskProfile)> {
        self.accounts
            .iter()
            .map(|a| (a.id.clone(), a.risk.clone()))
            .collect()
    }

    pub fn account(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| &a.id == id)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            risk_window: self.risk_window,
            rebalance_every: self.rebalance_every,
            risk_free_rate: self.risk_free_rate,
            loss_cutoff: self.loss_cutoff,
            reduced_max_risk: self.reduced_max_risk,
            resume_halted: self.resume_halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.accounts.len(), 2);
        assert!(config.accounts[0].risk.scalping_mode);
        assert_eq!(config.fee_rate, dec!(0.001));
    }

    #[test]
    fn test_parses_partial_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "rebalance_every": 10,
                "accounts": [
                    {"id": "danny", "initial_balance": "250", "scalping_mode": true},
                    {"id": "giuseppe", "max_risk": "0.01"}
                ]
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.rebalance_every, Some(10));
        assert_eq!(config.risk_window, 5);
        assert_eq!(config.session_settings().reduced_max_risk, dec!(0.01));
        assert!(!config.session_settings().resume_halted);
        assert_eq!(config.accounts[0].risk.initial_balance, dec!(250));
        assert_eq!(config.accounts[1].risk.max_risk, dec!(0.01));
        assert_eq!(config.accounts[1].risk.initial_balance, dec!(100));
    }

    #[test]
    fn test_rejects_invalid_configs() {
        let mut dup = EngineConfig::default();
        dup.accounts[1].id = dup.accounts[0].id.clone();
        assert!(matches!(dup.validate(), Err(EngineError::DuplicateAccount(_))));

        let empty = EngineConfig {
            accounts: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let mut bad_risk = EngineConfig::default();
        bad_risk.accounts[0].risk.max_drawdown = dec!(1.5);
        assert!(bad_risk.validate().is_err());

        let no_window = EngineConfig {
            risk_window: 0,
            ..Default::default()
        };
        assert!(no_window.validate().is_err());

        let no_cutoff = EngineConfig {
            loss_cutoff: Decimal::ZERO,
            ..Default::default()
        };
        assert!(no_cutoff.validate().is_err());

        assert!(serde_json::from_str::<EngineConfig>(r#"{"accounts": [{"id": "  "}]}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("matrader-config-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&EngineConfig::default()).unwrap()).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.accounts.len(), 2);
        assert!(EngineConfig::load(path.with_extension("missing")).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
