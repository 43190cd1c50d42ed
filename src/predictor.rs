//! Price forecasters consumed by the session.
//!
//! The engine treats the forecaster as a black box: it receives the current
//! observation vector and returns a predicted next price, or an error that the
//! decision policy turns into HOLD.

use thiserror::Error;

use crate::error::EngineError;
use crate::indicators::SMA_INDEX;
use crate::models::BAR_FIELDS;

/// Offset of the close price inside an observation.
const CLOSE_INDEX: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    #[error("No forecast available for step {0}")]
    Exhausted(usize),

    #[error("Observation has {got} values, need at least {need}")]
    ShortObservation { got: usize, need: usize },

    #[error("Forecast is not a finite positive price: {0}")]
    InvalidForecast(f64),

    #[error("{0}")]
    Backend(String),
}

impl From<PredictorError> for EngineError {
    fn from(e: PredictorError) -> Self {
        EngineError::PredictorUnavailable(e.to_string())
    }
}

pub trait Predictor: Send {
    fn predict(&mut self, observation: &[f64]) -> Result<f64, PredictorError>;

    /// Called at the start of every episode.
    fn reset(&mut self) {}
}

impl<F> Predictor for F
where
    F: FnMut(&[f64]) -> Result<f64, PredictorError> + Send,
{
    fn predict(&mut self, observation: &[f64]) -> Result<f64, PredictorError> {
        self(observation)
    }
}

/// Replays a forecast series produced elsewhere, one value per call.
#[derive(Debug, Clone)]
pub struct ReplayPredictor {
    forecasts: Vec<f64>,
    cursor: usize,
}

impl ReplayPredictor {
    pub fn new(forecasts: Vec<f64>) -> Self {
        Self {
            forecasts,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.forecasts.len()
    }
}

impl Predictor for ReplayPredictor {
    fn predict(&mut self, _observation: &[f64]) -> Result<f64, PredictorError> {
        let step = self.cursor;
        self.cursor += 1;
        let value = *self
            .forecasts
            .get(step)
            .ok_or(PredictorError::Exhausted(step))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(PredictorError::InvalidForecast(value));
        }
        Ok(value)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Extrapolates the distance between the last close and its moving average.
/// Needs no model; used when no external forecasts are supplied.
#[derive(Debug, Clone)]
pub struct MomentumPredictor {
    gain: f64,
}

impl MomentumPredictor {
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }
}

impl Default for MomentumPredictor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Predictor for MomentumPredictor {
    fn predict(&mut self, observation: &[f64]) -> Result<f64, PredictorError> {
        let sma_at = BAR_FIELDS + SMA_INDEX;
        if observation.len() <= sma_at {
            return Err(PredictorError::ShortObservation {
                got: observation.len(),
                need: sma_at + 1,
            });
        }
        let close = observation[CLOSE_INDEX];
        let sma = observation[sma_at];
        let forecast = close + (close - sma) * self.gain;
        if !forecast.is_finite() || forecast <= 0.0 {
            return Err(PredictorError::InvalidForecast(forecast));
        }
        Ok(forecast)
    }
}
