//! Operating modes and the controller's mutable state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Who holds actuation authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No automatic or manual doses; scheduled doses still run while the loop runs.
    #[default]
    Disabled,
    /// Operator doses on demand; cooldown and thresholds do not apply.
    Manual,
    /// Threshold policy and flow strategy decide.
    Automatic,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Disabled => "disabled",
            Mode::Manual => "manual",
            Mode::Automatic => "automatic",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Mode::Disabled),
            "manual" => Ok(Mode::Manual),
            "automatic" | "auto" => Ok(Mode::Automatic),
            other => Err(ControlError::Validation(format!(
                "unknown mode '{other}' (expected disabled, manual or automatic)"
            ))),
        }
    }
}

/// Mutable controller state. Owned by the controller behind its state lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerState {
    pub mode: Mode,
    pub running: bool,
    pub paused: bool,
    /// Timestamp of the last successful actuation of any kind.
    pub last_dose_timestamp: Option<f64>,
    /// Number of successful actuations; never decreases.
    pub dose_counter: u64,
    pub pid_integral: f64,
    pub pid_last_error: f64,
    pub pid_last_timestamp: Option<f64>,
    /// Last good sensor reading seen by a tick or a manual dose.
    pub last_measurement: Option<f64>,
    pub tick_count: u64,
    pub last_tick_error: Option<String>,
}
