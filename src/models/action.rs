//! Trading action chosen for an account at one step.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Discrete action space. The numeric codes are part of the external
/// contract (SELL=0, HOLD=1, BUY=2) and are what the journal stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Action {
    Sell,
    #[default]
    Hold,
    Buy,
}

impl Action {
    pub fn code(&self) -> u8 {
        match self {
            Action::Sell => 0,
            Action::Hold => 1,
            Action::Buy => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Action::Sell),
            1 => Ok(Action::Hold),
            2 => Ok(Action::Buy),
            other => Err(EngineError::invalid(format!("unknown action code {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
            Action::Buy => "BUY",
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action.code()
    }
}

impl TryFrom<u8> for Action {
    type Error = EngineError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
