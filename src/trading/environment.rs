//! Discrete-time multi-account trading environment.
//!
//! Each call to [`TradingEnvironment::step`] applies one action per account
//! at the current bar's close, marks every ledger, runs the drawdown check
//! and advances the shared step counter exactly once.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::indicators::IndicatorSource;
use crate::models::{
    AccountId, AccountLedger, AccountSnapshot, AccountStatus, Action, MarketFeed, MarketStep,
    PerformanceRecord,
};
use crate::risk::{RiskManager, RiskProfile};

/// Exchange fee charged on both sides of a trade.
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.001);

#[derive(Debug)]
struct AccountSlot {
    risk: RiskManager,
    ledger: AccountLedger,
}

/// What one account's action actually did.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fill {
    None,
    Bought { invest: Decimal, shares: Decimal },
    Sold { proceeds: Decimal, shares: Decimal },
    Refused,
}

/// Result of one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Observation at the new current step
    pub observation: Vec<f64>,
    /// `net_worth_after - balance_before` per account
    pub rewards: BTreeMap<AccountId, Decimal>,
    pub done: bool,
    pub record: PerformanceRecord,
}

pub struct TradingEnvironment {
    feed: MarketFeed,
    accounts: BTreeMap<AccountId, AccountSlot>,
    indicators: Box<dyn IndicatorSource>,
    fee_rate: Decimal,
    current_step: usize,
    episode: u32,
    done: bool,
}

impl TradingEnvironment {
    pub fn new(
        feed: MarketFeed,
        accounts: Vec<(AccountId, RiskProfile)>,
        fee_rate: Decimal,
        indicators: Box<dyn IndicatorSource>,
    ) -> Result<Self> {
        if accounts.is_empty() {
            return Err(EngineError::invalid("at least one account is required"));
        }
        if fee_rate < Decimal::ZERO || fee_rate >= Decimal::ONE {
            return Err(EngineError::invalid(format!(
                "fee rate must be in [0, 1), got {}",
                fee_rate
            )));
        }

        let mut slots = BTreeMap::new();
        for (id, profile) in accounts {
            if slots.contains_key(&id) {
                return Err(EngineError::DuplicateAccount(id));
            }
            let ledger = AccountLedger::new(profile.initial_balance);
            let risk = RiskManager::new(profile)?;
            slots.insert(id, AccountSlot { risk, ledger });
        }

        info!(
            accounts = slots.len(),
            steps = feed.len(),
            fee_rate = %fee_rate,
            "Trading environment ready"
        );

        Ok(Self {
            feed,
            accounts: slots,
            indicators,
            fee_rate,
            current_step: 0,
            episode: 1,
            done: false,
        })
    }

    /// Start a new episode. Every account's net worth becomes its cash
    /// balance and its position is cleared; HALTED status carries over.
    pub fn reset(&mut self) -> Vec<f64> {
        if self.current_step > 0 {
            self.episode += 1;
        }
        self.current_step = 0;
        self.done = false;
        for slot in self.accounts.values_mut() {
            slot.ledger.rollover();
        }
        debug!(episode = self.episode, "Environment reset");
        self.observation()
    }

    /// Apply `actions` at the current bar and advance one step. Accounts
    /// missing from `actions` hold. Unknown ids are rejected before any
    /// account is touched.
    pub fn step(&mut self, actions: &BTreeMap<AccountId, Action>) -> Result<StepOutcome> {
        if self.done {
            return Err(EngineError::EpisodeFinished {
                step: self.current_step,
            });
        }
        if let Some(unknown) = actions.keys().find(|id| !self.accounts.contains_key(*id)) {
            return Err(EngineError::UnknownAccount(unknown.clone()));
        }

        let step = self.current_step;
        let bar = self
            .feed
            .get(step)
            .cloned()
            .ok_or_else(|| EngineError::invalid(format!("no bar at step {}", step)))?;
        let fee_rate = self.fee_rate;

        let mut rewards = BTreeMap::new();
        let mut snapshots = BTreeMap::new();

        for (id, slot) in self.accounts.iter_mut() {
            let action = actions.get(id).copied().unwrap_or_default();
            let balance_before = slot.ledger.balance;

            let fill = match take_action(slot, action, &bar, fee_rate) {
                Ok(fill) => fill,
                Err(e) => {
                    error!(account = %id, step, error = %e, "Action failed, holding");
                    Fill::None
                }
            };
            slot.ledger.mark(bar.close);

            match fill {
                Fill::Bought { invest, shares } => {
                    info!(account = %id, step, invest = %invest, shares = %shares, "BUY");
                }
                Fill::Sold { proceeds, shares } => {
                    info!(account = %id, step, proceeds = %proceeds, shares = %shares, "SELL");
                }
                Fill::Refused => {
                    warn!(account = %id, step, "BUY refused, account halted");
                }
                Fill::None => {}
            }

            if let Err(e) = slot.risk.check_drawdown(slot.ledger.net_worth) {
                error!(account = %id, step, error = %e, "Drawdown check failed");
            }

            rewards.insert(id.clone(), slot.ledger.net_worth - balance_before);
            snapshots.insert(
                id.clone(),
                AccountSnapshot::capture(
                    &slot.ledger,
                    action,
                    fill == Fill::Refused,
                    slot.risk.status(),
                ),
            );
        }

        self.current_step += 1;
        self.done = self.current_step >= self.max_steps() - 1;

        Ok(StepOutcome {
            observation: self.observation(),
            rewards,
            done: self.done,
            record: PerformanceRecord {
                episode: self.episode,
                step,
                accounts: snapshots,
            },
        })
    }

    /// Raw fields of the current bar followed by the indicator vector over
    /// every bar up to and including it.
    pub fn observation(&self) -> Vec<f64> {
        let history = self.feed.history(self.current_step);
        let mut obs = Vec::with_capacity(self.observation_width());
        match history.last() {
            Some(bar) => obs.extend(bar.features()),
            None => obs.extend([0.0; crate::models::BAR_FIELDS]),
        }
        obs.extend(self.indicators.compute(history));
        obs
    }

    pub fn observation_width(&self) -> usize {
        crate::models::BAR_FIELDS + self.indicators.width()
    }

    /// Explicitly return a halted account to ACTIVE at its current net worth.
    pub fn resume(&mut self, id: &AccountId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let net_worth = slot.ledger.net_worth;
        slot.risk.resume(net_worth)
    }

    pub fn set_max_risk(&mut self, id: &AccountId, max_risk: Decimal) -> Result<()> {
        self.slot_mut(id)?.risk.set_max_risk(max_risk)
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn max_steps(&self) -> usize {
        self.feed.len()
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn feed(&self) -> &MarketFeed {
        &self.feed
    }

    /// Bar the next step will trade at.
    pub fn current_bar(&self) -> Option<&MarketStep> {
        self.feed.get(self.current_step)
    }

    pub fn account_ids(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.keys()
    }

    pub fn ledger(&self, id: &AccountId) -> Option<&AccountLedger> {
        self.accounts.get(id).map(|s| &s.ledger)
    }

    pub fn risk_manager(&self, id: &AccountId) -> Option<&RiskManager> {
        self.accounts.get(id).map(|s| &s.risk)
    }

    pub fn status(&self, id: &AccountId) -> Option<AccountStatus> {
        self.accounts.get(id).map(|s| s.risk.status())
    }

    fn slot_mut(&mut self, id: &AccountId) -> Result<&mut AccountSlot> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownAccount(id.clone()))
    }
}

/// Execute `action` for one account at the bar's close. Net worth is marked
/// by the caller.
fn take_action(slot: &mut AccountSlot, action: Action, bar: &MarketStep, fee_rate: Decimal) -> Result<Fill> {
    let price = bar.close;
    let ledger = &mut slot.ledger;

    match action {
        Action::Hold => Ok(Fill::None),
        Action::Sell => {
            if ledger.shares_held <= Decimal::ZERO {
                return Ok(Fill::None);
            }
            let shares = ledger.shares_held;
            let proceeds = shares * price * (Decimal::ONE - fee_rate);
            ledger.balance += proceeds;
            ledger.shares_held = Decimal::ZERO;
            Ok(Fill::Sold { proceeds, shares })
        }
        Action::Buy => {
            if slot.risk.is_halted() {
                return Ok(Fill::Refused);
            }
            if ledger.balance <= Decimal::ZERO {
                return Ok(Fill::None);
            }
            let allowed = slot.risk.max_investment(ledger.balance)?;
            let limit = slot.risk.risk_limit(ledger.balance, ledger.net_worth)?;
            let invest = allowed.min(limit).min(ledger.balance);
            if invest <= Decimal::ZERO {
                return Ok(Fill::None);
            }
            let shares = invest / price * (Decimal::ONE - fee_rate);
            ledger.balance -= invest;
            ledger.shares_held += shares;
            Ok(Fill::Bought { invest, shares })
        }
    }
}
