//! Threshold and cooldown gate for automatic doses.
//!
//! Pure functions over the config, the state and a reading. The flow rate of
//! an approved dose is chosen separately by the active `FlowStrategy`.

use serde::Serialize;

use crate::config::ControllerConfig;
use crate::mode::{ControllerState, Mode};

/// Outcome of the automatic-dose gate, reported per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AutoDecision {
    Dose,
    NotAutomatic,
    Cooldown { remaining_s: f64 },
    InvalidReading,
    BelowLow,
    WithinBand,
}

/// Duration and flow rate of one actuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DoseRequest {
    pub duration_s: f64,
    pub flow_rate: f64,
}

/// Seconds left before another automatic dose may run, or `None` when the
/// cooldown has elapsed. A last dose stamped in the future counts as a full
/// cooldown.
pub fn cooldown_remaining(cfg: &ControllerConfig, state: &ControllerState, now: f64) -> Option<f64> {
    let last = state.last_dose_timestamp?;
    let elapsed = now - last;
    if elapsed < 0.0 {
        return Some(cfg.min_dose_interval_s);
    }
    if elapsed < cfg.min_dose_interval_s {
        Some(cfg.min_dose_interval_s - elapsed)
    } else {
        None
    }
}

/// Decide whether an automatic dose should run now.
///
/// Checks run in order: mode, cooldown, reading validity, then the threshold
/// band. Only a reading strictly above `high_threshold` doses.
pub fn evaluate(
    cfg: &ControllerConfig,
    state: &ControllerState,
    measurement: f64,
    now: f64,
) -> AutoDecision {
    if state.mode != Mode::Automatic {
        return AutoDecision::NotAutomatic;
    }
    if let Some(remaining_s) = cooldown_remaining(cfg, state, now) {
        return AutoDecision::Cooldown { remaining_s };
    }
    if !measurement.is_finite() {
        return AutoDecision::InvalidReading;
    }
    if measurement < cfg.low_threshold {
        AutoDecision::BelowLow
    } else if measurement > cfg.high_threshold {
        AutoDecision::Dose
    } else {
        AutoDecision::WithinBand
    }
}

pub fn should_auto_dose(
    cfg: &ControllerConfig,
    state: &ControllerState,
    measurement: f64,
    now: f64,
) -> bool {
    evaluate(cfg, state, measurement, now) == AutoDecision::Dose
}
