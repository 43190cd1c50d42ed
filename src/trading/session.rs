//! Episode runner: forecast, decide, step, journal, and periodic rebalancing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::environment::TradingEnvironment;
use super::policy::{market_risk_level, DecisionPolicy};
use crate::journal::PerformanceJournal;
use crate::models::{AccountId, AccountStatus, Action, PerformanceRecord};
use crate::portfolio::{
    allocate_concurrently, AllocationRequest, AssetUniverse, PortfolioOptimizer, PortfolioWeights,
};
use crate::predictor::Predictor;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bars averaged into the market risk level
    pub risk_window: usize,

    /// Re-optimize allocations every N steps when a universe is attached
    pub rebalance_every: Option<usize>,

    pub risk_free_rate: f64,

    /// Episode loss, as a fraction of starting net worth, past which an
    /// account trades at `reduced_max_risk`
    pub loss_cutoff: Decimal,

    pub reduced_max_risk: Decimal,

    /// Return halted accounts to ACTIVE before every episode after the first
    pub resume_halted: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            risk_window: 5,
            rebalance_every: None,
            risk_free_rate: 0.01,
            loss_cutoff: dec!(0.10),
            reduced_max_risk: dec!(0.01),
            resume_halted: false,
        }
    }
}

impl SessionSettings {
    /// Per-trade risk for an account whose episode P&L is `pnl`, given its
    /// configured risk `base`. Never raises risk above `base`.
    pub fn max_risk_for(&self, pnl: Decimal, base: Decimal) -> Decimal {
        if pnl < -self.loss_cutoff {
            self.reduced_max_risk.min(base)
        } else {
            base
        }
    }
}

/// Per-account outcome of one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSummary {
    pub start_net_worth: Decimal,
    pub end_net_worth: Decimal,
    pub buys: usize,
    pub sells: usize,
    pub refused: usize,
    pub status: AccountStatus,
}

impl AccountSummary {
    /// Fractional change of net worth since the episode started.
    pub fn pnl(&self) -> Decimal {
        if self.start_net_worth <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.end_net_worth - self.start_net_worth) / self.start_net_worth
    }

    pub fn return_pct(&self) -> Decimal {
        self.pnl() * dec!(100)
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub episode: u32,
    pub steps: usize,
    pub cancelled: bool,
    pub accounts: BTreeMap<AccountId, AccountSummary>,
    /// Latest allocation per account, if a rebalance ran
    pub allocations: BTreeMap<AccountId, PortfolioWeights>,
}

impl std::fmt::Display for EpisodeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", format!(" EPISODE {} ", self.episode))?;
        writeln!(
            f,
            "Steps: {}{}",
            self.steps,
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        for (id, acc) in &self.accounts {
            writeln!(f)?;
            writeln!(f, "--- {} ---", id)?;
            writeln!(f, "Start:     ${:.2}", acc.start_net_worth)?;
            writeln!(f, "End:       ${:.2}", acc.end_net_worth)?;
            writeln!(f, "Return:    {:.2}%", acc.return_pct())?;
            writeln!(
                f,
                "Actions:   {} buys, {} sells ({} refused)",
                acc.buys, acc.sells, acc.refused
            )?;
            writeln!(f, "Status:    {:?}", acc.status)?;
            if let Some(weights) = self.allocations.get(id) {
                writeln!(f, "Weights:   {}", weights)?;
            }
        }
        writeln!(f, "{:=^60}", "")
    }
}

pub struct Session {
    env: TradingEnvironment,
    predictor: Box<dyn Predictor>,
    journal: Box<dyn PerformanceJournal>,
    policy: DecisionPolicy,
    settings: SessionSettings,
    universe: Option<AssetUniverse>,
    /// Configured per-trade risk of each account
    base_risk: BTreeMap<AccountId, Decimal>,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        env: TradingEnvironment,
        predictor: Box<dyn Predictor>,
        journal: Box<dyn PerformanceJournal>,
        settings: SessionSettings,
    ) -> Self {
        let base_risk = env
            .account_ids()
            .filter_map(|id| Some((id.clone(), env.risk_manager(id)?.profile().max_risk)))
            .collect();
        Self {
            base_risk,
            env,
            predictor,
            journal,
            policy: DecisionPolicy,
            settings,
            universe: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_universe(mut self, universe: AssetUniverse) -> Self {
        self.universe = Some(universe);
        self
    }

    /// Get shutdown signal for external control. Checked between steps.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn journal(&self) -> &dyn PerformanceJournal {
        self.journal.as_ref()
    }

    /// Run up to `episodes` episodes, stopping early on shutdown.
    pub async fn run(&mut self, episodes: u32) -> Result<Vec<EpisodeSummary>> {
        let mut summaries = Vec::new();
        for n in 0..episodes {
            if n > 0 && self.settings.resume_halted {
                self.resume_halted();
            }
            let summary = self.run_episode().await?;
            let cancelled = summary.cancelled;
            summaries.push(summary);
            if cancelled {
                break;
            }
        }
        Ok(summaries)
    }

    /// Reset the environment and step it until the episode ends or shutdown
    /// is requested.
    pub async fn run_episode(&mut self) -> Result<EpisodeSummary> {
        self.predictor.reset();
        let mut observation = self.env.reset();
        let episode = self.env.episode();

        let mut accounts: BTreeMap<AccountId, AccountSummary> = self
            .env
            .account_ids()
            .filter_map(|id| {
                let ledger = self.env.ledger(id)?;
                let summary = AccountSummary {
                    start_net_worth: ledger.net_worth,
                    end_net_worth: ledger.net_worth,
                    buys: 0,
                    sells: 0,
                    refused: 0,
                    status: self.env.status(id).unwrap_or_default(),
                };
                Some((id.clone(), summary))
            })
            .collect();
        let mut allocations = BTreeMap::new();
        let mut steps = 0;
        let mut cancelled = false;

        info!(episode, steps = self.env.max_steps(), "Episode started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(episode, step = self.env.current_step(), "Shutdown requested, stopping episode");
                cancelled = true;
                break;
            }

            let step = self.env.current_step();
            let bar = self
                .env
                .current_bar()
                .cloned()
                .with_context(|| format!("No bar at step {}", step))?;
            let risk_level = market_risk_level(self.env.feed().history(step), self.settings.risk_window);

            // One forecast per step; every account trades the same feed.
            let forecast = self.predictor.predict(&observation);
            let decision = self.policy.decide_with_forecast(&forecast, bar.close, risk_level);
            let action = decision.action;
            debug!(step, risk_level = %risk_level, action = %action, "Decision");

            let actions: BTreeMap<AccountId, Action> =
                self.env.account_ids().map(|id| (id.clone(), action)).collect();
            let outcome = self
                .env
                .step(&actions)
                .with_context(|| format!("Step {} failed", step))?;
            steps += 1;

            if let Err(e) = self.journal.append(&outcome.record) {
                warn!(step, error = %e, "Journal append failed, continuing");
            }
            tally(&mut accounts, &outcome.record);
            self.adjust_for_losses(&accounts);
            if let Some(prediction) = decision.prediction {
                self.log_stop_levels(&outcome.record, bar.close, prediction);
            }

            if let Some(every) = self.settings.rebalance_every {
                if every > 0 && steps % every == 0 {
                    allocations.extend(self.rebalance(step + 1).await);
                }
            }

            observation = outcome.observation;
            if outcome.done {
                break;
            }
        }

        info!(episode, steps, cancelled, "Episode finished");

        Ok(EpisodeSummary {
            episode,
            steps,
            cancelled,
            accounts,
            allocations,
        })
    }

    /// Cut the per-trade risk of accounts past the episode loss cutoff and
    /// restore it once they are back inside.
    fn adjust_for_losses(&mut self, accounts: &BTreeMap<AccountId, AccountSummary>) {
        for (id, acc) in accounts {
            let Some(&base) = self.base_risk.get(id) else {
                continue;
            };
            let pnl = acc.pnl();
            let target = self.settings.max_risk_for(pnl, base);
            if self.env.risk_manager(id).map(|r| r.profile().max_risk) == Some(target) {
                continue;
            }
            match self.env.set_max_risk(id, target) {
                Ok(()) if target < base => {
                    info!(account = %id, pnl = %pnl.round_dp(4), max_risk = %target, "Account losing, reducing risk");
                }
                Ok(()) => {
                    info!(account = %id, pnl = %pnl.round_dp(4), max_risk = %target, "Account recovered, restoring risk");
                }
                Err(e) => warn!(account = %id, error = %e, "Risk adjustment failed"),
            }
        }
    }

    fn resume_halted(&mut self) {
        let halted: Vec<AccountId> = self
            .env
            .account_ids()
            .filter(|id| self.env.status(id) == Some(AccountStatus::Halted))
            .cloned()
            .collect();
        for id in halted {
            match self.env.resume(&id) {
                Ok(()) => info!(account = %id, "Halted account resumed for the new episode"),
                Err(e) => warn!(account = %id, error = %e, "Could not resume account"),
            }
        }
    }

    /// Protective stop and trailing target for every account that bought.
    fn log_stop_levels(&self, record: &PerformanceRecord, entry: Decimal, prediction: Decimal) {
        for (id, snap) in &record.accounts {
            if snap.action != Action::Buy || snap.refused {
                continue;
            }
            if let Some(risk) = self.env.risk_manager(id) {
                debug!(
                    account = %id,
                    entry = %entry,
                    stop_loss = %risk.dynamic_stop_loss(entry, prediction),
                    trailing = %risk.trailing_stop(entry, prediction),
                    "Stop levels"
                );
            }
        }
    }

    /// Optimize every account's allocation over the universe prices seen up
    /// to `bars`. Accounts whose optimizer cannot be built are skipped.
    pub async fn rebalance(&self, bars: usize) -> BTreeMap<AccountId, PortfolioWeights> {
        let Some(universe) = &self.universe else {
            return BTreeMap::new();
        };
        let (returns, cov) = universe.moments_until(bars);

        let requests: Vec<AllocationRequest> = self
            .env
            .account_ids()
            .filter_map(|id| {
                let risk = self.env.risk_manager(id)?;
                let net_worth = self.env.ledger(id)?.net_worth;
                match PortfolioOptimizer::for_account(
                    returns.clone(),
                    cov.clone(),
                    self.settings.risk_free_rate,
                    risk,
                    net_worth,
                ) {
                    Ok(optimizer) => Some(AllocationRequest {
                        account: id.clone(),
                        optimizer,
                    }),
                    Err(e) => {
                        warn!(account = %id, error = %e, "Skipping rebalance");
                        None
                    }
                }
            })
            .collect();

        info!(accounts = requests.len(), assets = universe.len(), bars, "Rebalancing");
        allocate_concurrently(requests).await.into_iter().collect()
    }
}

fn tally(accounts: &mut BTreeMap<AccountId, AccountSummary>, record: &PerformanceRecord) {
    for (id, snap) in &record.accounts {
        let Some(acc) = accounts.get_mut(id) else {
            continue;
        };
        match snap.action {
            Action::Buy if snap.refused => acc.refused += 1,
            Action::Buy => acc.buys += 1,
            Action::Sell => acc.sells += 1,
            Action::Hold => {}
        }
        acc.end_net_worth = snap.net_worth;
        acc.status = snap.status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TechnicalIndicators;
    use crate::journal::MemoryJournal;
    use crate::models::bar::tests::bars_from_closes;
    use crate::models::MarketFeed;
    use crate::predictor::{PredictorError, ReplayPredictor};
    use crate::risk::RiskProfile;
    use crate::trading::environment::DEFAULT_FEE_RATE;

    fn env(closes: &[Decimal], ids: &[&str]) -> TradingEnvironment {
        let accounts = ids
            .iter()
            .map(|id| {
                (
                    AccountId::new(*id).unwrap(),
                    RiskProfile {
                        initial_balance: dec!(1000),
                        ..Default::default()
                    },
                )
            })
            .collect();
        env_with_profiles(closes, accounts)
    }

    fn env_with_profiles(closes: &[Decimal], accounts: Vec<(AccountId, RiskProfile)>) -> TradingEnvironment {
        TradingEnvironment::new(
            MarketFeed::new(bars_from_closes(closes)).unwrap(),
            accounts,
            DEFAULT_FEE_RATE,
            Box::new(TechnicalIndicators::scalping().unwrap()),
        )
        .unwrap()
    }

    struct FailingJournal;

    impl PerformanceJournal for FailingJournal {
        fn append(&mut self, _record: &PerformanceRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }

        fn records(&self) -> &[PerformanceRecord] {
            &[]
        }
    }

    #[test]
    fn test_episode_journals_every_step_in_order() {
        let closes = [dec!(100), dec!(100), dec!(100), dec!(100)];
        // BUY, SELL, then the replay runs dry and the policy holds
        let predictor = ReplayPredictor::new(vec![105.0, 95.0]);
        let mut session = Session::new(
            env(&closes, &["danny", "giuseppe"]),
            Box::new(predictor),
            Box::new(MemoryJournal::new()),
            SessionSettings::default(),
        );

        let summary = tokio_test::block_on(session.run_episode()).unwrap();
        assert_eq!(summary.steps, 3);
        assert!(!summary.cancelled);

        let records = session.journal().records();
        let steps: Vec<usize> = records.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(records[0].accounts.len(), 2);

        let danny = &summary.accounts[&AccountId::new("danny").unwrap()];
        assert_eq!((danny.buys, danny.sells, danny.refused), (1, 1, 0));
        assert!(danny.end_net_worth < danny.start_net_worth);
    }

    #[test]
    fn test_shutdown_stops_before_next_step() {
        let closes = [dec!(100), dec!(101), dec!(102)];
        let mut session = Session::new(
            env(&closes, &["danny"]),
            Box::new(ReplayPredictor::new(vec![])),
            Box::new(MemoryJournal::new()),
            SessionSettings::default(),
        );
        session.shutdown_signal().store(true, Ordering::SeqCst);

        let summaries = tokio_test::block_on(session.run(3)).unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].cancelled);
        assert_eq!(summaries[0].steps, 0);
        assert!(session.journal().records().is_empty());
    }

    #[test]
    fn test_journal_failure_does_not_abort() {
        let closes = [dec!(100), dec!(100), dec!(100)];
        let mut session = Session::new(
            env(&closes, &["danny"]),
            Box::new(|_: &[f64]| -> std::result::Result<f64, PredictorError> {
                Err(PredictorError::Backend("offline".into()))
            }),
            Box::new(FailingJournal),
            SessionSettings::default(),
        );
        let summary = tokio_test::block_on(session.run_episode()).unwrap();
        assert_eq!(summary.steps, 2);
        let danny = &summary.accounts[&AccountId::new("danny").unwrap()];
        assert_eq!(danny.buys + danny.sells, 0);
    }

    #[test]
    fn test_episodes_compound_and_rebalance() {
        let closes = [dec!(100), dec!(100), dec!(110), dec!(110), dec!(110)];
        let mut series = std::collections::BTreeMap::new();
        series.insert("BTC/EUR".to_string(), vec![dec!(100), dec!(101), dec!(103), dec!(102), dec!(104)]);
        series.insert("ETH/EUR".to_string(), vec![dec!(10), dec!(9), dec!(10), dec!(9), dec!(10)]);

        let mut session = Session::new(
            env(&closes, &["danny"]),
            Box::new(ReplayPredictor::new(vec![105.0])),
            Box::new(MemoryJournal::new()),
            SessionSettings {
                rebalance_every: Some(2),
                ..Default::default()
            },
        )
        .with_universe(AssetUniverse::new(series).unwrap());

        let summaries = tokio_test::block_on(session.run(2)).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].episode, 1);
        assert_eq!(summaries[1].episode, 2);

        let id = AccountId::new("danny").unwrap();
        assert_eq!(
            summaries[1].accounts[&id].start_net_worth,
            summaries[0].accounts[&id].end_net_worth
        );

        let weights = &summaries[0].allocations[&id];
        assert_eq!(weights.as_slice().len(), 2);
        assert!((weights.as_slice().iter().sum::<f64>() - 1.0).abs() < 1e-6);

        let text = summaries[0].to_string();
        assert!(text.contains("EPISODE 1"));
        assert!(text.contains("danny"));
    }

    /// Eight buys at 100, then the price collapses to 1.
    fn crash_closes() -> Vec<Decimal> {
        let mut closes = vec![dec!(100); 8];
        closes.extend([dec!(1); 3]);
        closes
    }

    #[test]
    fn test_losing_account_trades_at_reduced_risk() {
        // A wide stop makes max_investment the binding BUY limit.
        let profile = RiskProfile {
            initial_balance: dec!(1000),
            trailing_stop_pct: dec!(0.8),
            max_drawdown: dec!(0.9),
            ..Default::default()
        };
        let id = AccountId::new("danny").unwrap();
        let mut forecasts = vec![200.0; 8];
        forecasts.extend([1.0, 2.0]);

        let mut session = Session::new(
            env_with_profiles(&crash_closes(), vec![(id.clone(), profile)]),
            Box::new(ReplayPredictor::new(forecasts)),
            Box::new(MemoryJournal::new()),
            SessionSettings::default(),
        );
        let summary = tokio_test::block_on(session.run_episode()).unwrap();
        assert_eq!(summary.steps, 10);
        assert!(summary.accounts[&id].pnl() < dec!(-0.10));

        let records = session.journal().records();
        // Before the loss: 2% of cash per BUY
        assert_eq!(records[0].accounts[&id].balance, dec!(980));
        assert_eq!(records[8].accounts[&id].action, Action::Hold);

        let before = records[8].accounts[&id].balance;
        let after = &records[9].accounts[&id];
        assert_eq!(after.action, Action::Buy);
        assert!(!after.refused);
        assert_eq!(before - after.balance, before * dec!(0.01) / dec!(0.8));
    }

    #[test]
    fn test_max_risk_for_loss_cutoff() {
        let settings = SessionSettings::default();
        assert_eq!(settings.max_risk_for(dec!(-0.11), dec!(0.02)), dec!(0.01));
        assert_eq!(settings.max_risk_for(dec!(-0.10), dec!(0.02)), dec!(0.02));
        assert_eq!(settings.max_risk_for(dec!(0.05), dec!(0.02)), dec!(0.02));
        // Accounts already below the reduced level keep their own risk
        assert_eq!(settings.max_risk_for(dec!(-0.5), dec!(0.005)), dec!(0.005));
    }

    #[test]
    fn test_halted_account_resumes_only_when_configured() {
        let mut forecasts = vec![200.0; 8];
        forecasts.extend([1.0, 1.0]);
        let id = AccountId::new("danny").unwrap();

        let first_step_of_episode_two = |resume_halted: bool| {
            let mut session = Session::new(
                env(&crash_closes(), &["danny"]),
                Box::new(ReplayPredictor::new(forecasts.clone())),
                Box::new(MemoryJournal::new()),
                SessionSettings {
                    resume_halted,
                    ..Default::default()
                },
            );
            let summaries = tokio_test::block_on(session.run(2)).unwrap();
            assert_eq!(summaries[0].accounts[&id].status, AccountStatus::Halted);
            session
                .journal()
                .records()
                .iter()
                .find(|r| r.episode == 2)
                .map(|r| r.accounts[&id].clone())
                .unwrap()
        };

        let kept = first_step_of_episode_two(false);
        assert_eq!(kept.action, Action::Buy);
        assert!(kept.refused);

        let resumed = first_step_of_episode_two(true);
        assert_eq!(resumed.action, Action::Buy);
        assert!(!resumed.refused);
        assert_eq!(resumed.status, AccountStatus::Active);
    }
}
