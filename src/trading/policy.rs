//! Forecast-to-action decision rule.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::models::{Action, MarketStep};
use crate::predictor::PredictorError;

/// Market risk above which the policy always holds.
pub const RISK_GATE: Decimal = dec!(0.05);

/// Forecast must clear the last close by this fraction to trade.
pub const SIGNAL_BAND: Decimal = dec!(0.01);

/// Action for one step and the forecast price it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub action: Action,
    /// `None` when the predictor failed or the forecast was not usable
    pub prediction: Option<Decimal>,
}

/// Stateless decision rule shared by every account.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionPolicy;

impl DecisionPolicy {
    /// `HOLD` above the risk gate, otherwise `BUY`/`SELL` when the forecast is
    /// more than 1% above/below the last close.
    pub fn decide(&self, prediction: Decimal, last_close: Decimal, risk_level: Decimal) -> Action {
        if risk_level > RISK_GATE {
            return Action::Hold;
        }
        if prediction > last_close * (Decimal::ONE + SIGNAL_BAND) {
            Action::Buy
        } else if prediction < last_close * (Decimal::ONE - SIGNAL_BAND) {
            Action::Sell
        } else {
            Action::Hold
        }
    }

    /// Like [`decide`](Self::decide) but takes the raw predictor outcome.
    /// Any forecast failure becomes `HOLD`.
    pub fn decide_with_forecast(
        &self,
        forecast: &Result<f64, PredictorError>,
        last_close: Decimal,
        risk_level: Decimal,
    ) -> Decision {
        let prediction = match forecast {
            Ok(value) => {
                let parsed = Decimal::from_f64(*value);
                if parsed.is_none() {
                    warn!(forecast = value, "Forecast not representable, holding");
                }
                parsed
            }
            Err(e) => {
                warn!(error = %e, "Predictor unavailable, holding");
                None
            }
        };
        let action = prediction
            .map(|p| self.decide(p, last_close, risk_level))
            .unwrap_or(Action::Hold);
        Decision { action, prediction }
    }
}

/// Mean relative intrabar range `(high - low) / low` over the last `window`
/// bars of `history`. Zero for an empty history or window.
pub fn market_risk_level(history: &[MarketStep], window: usize) -> Decimal {
    if history.is_empty() || window == 0 {
        return Decimal::ZERO;
    }
    let start = history.len().saturating_sub(window);
    let recent = &history[start..];
    let total: Decimal = recent.iter().map(MarketStep::range_pct).sum();
    total / Decimal::from(recent.len())
}
