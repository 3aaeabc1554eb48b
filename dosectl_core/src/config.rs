//! Configuration types for the dosing controller.
//!
//! These are the runtime configuration structs used by `Controller`.
//! They are separate from the TOML-deserialized config in `dosectl_config`.

use std::time::Duration;

use serde::Serialize;

use crate::error::ControlError;
use crate::util::secs_to_duration;

/// Flow-rate curve used for automatic doses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowCurve {
    /// PID output normalized into the pump range.
    #[default]
    Pid,
    /// Linear interpolation of the excursion above the high threshold.
    Linear,
}

/// PID gains and numerical guards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Symmetric bound on the integral accumulator (error·s).
    pub integral_limit: f64,
    /// Raw output magnitude that maps to the full flow range.
    pub output_span: f64,
    /// Floor for the derivative time step (s).
    pub min_dt_s: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.1,
            kd: 0.5,
            integral_limit: 5.0,
            output_span: 1.0,
            min_dt_s: 0.001,
        }
    }
}

/// Alarm band and setpoint, reported in status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub high: f64,
    pub low: f64,
    pub target: f64,
}

/// Operational parameters of one controller instance.
///
/// Invariants (checked by `validate`): `low < target < high`,
/// `min_flow_rate <= default_flow_rate <= max_flow_rate`, interval and duration > 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerConfig {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub target_value: f64,
    pub min_dose_interval_s: f64,
    pub dose_duration_s: f64,
    pub min_flow_rate: f64,
    pub max_flow_rate: f64,
    /// Used by scheduled and manual doses that do not name a flow rate.
    pub default_flow_rate: f64,
    pub flow_curve: FlowCurve,
    pub pid: PidGains,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.25,
            low_threshold: 0.12,
            target_value: 0.15,
            min_dose_interval_s: 300.0,
            dose_duration_s: 30.0,
            min_flow_rate: 60.0,
            max_flow_rate: 150.0,
            default_flow_rate: 60.0,
            flow_curve: FlowCurve::Pid,
            pid: PidGains::default(),
        }
    }
}

fn finite_non_negative(name: &str, v: f64) -> Result<(), ControlError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ControlError::validation(format!(
            "{name} must be a finite value >= 0, got {v}"
        )))
    }
}

fn positive(name: &str, v: f64) -> Result<(), ControlError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ControlError::validation(format!("{name} must be > 0, got {v}")))
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControlError> {
        finite_non_negative("high_threshold", self.high_threshold)?;
        finite_non_negative("low_threshold", self.low_threshold)?;
        finite_non_negative("target_value", self.target_value)?;
        if !(self.low_threshold < self.target_value && self.target_value < self.high_threshold) {
            return Err(ControlError::validation(
                "thresholds must satisfy low_threshold < target_value < high_threshold",
            ));
        }
        positive("min_dose_interval_s", self.min_dose_interval_s)?;
        positive("dose_duration_s", self.dose_duration_s)?;
        self.check_duration(self.dose_duration_s)?;
        finite_non_negative("min_flow_rate", self.min_flow_rate)?;
        finite_non_negative("max_flow_rate", self.max_flow_rate)?;
        if self.min_flow_rate > self.max_flow_rate {
            return Err(ControlError::validation(
                "min_flow_rate must be <= max_flow_rate",
            ));
        }
        self.check_flow_rate(self.default_flow_rate)?;
        finite_non_negative("pid.kp", self.pid.kp)?;
        finite_non_negative("pid.ki", self.pid.ki)?;
        finite_non_negative("pid.kd", self.pid.kd)?;
        positive("pid.integral_limit", self.pid.integral_limit)?;
        positive("pid.output_span", self.pid.output_span)?;
        positive("pid.min_dt_s", self.pid.min_dt_s)?;
        Ok(())
    }

    /// Reject a flow rate outside the pump's hardware range.
    pub fn check_flow_rate(&self, rate: f64) -> Result<(), ControlError> {
        if rate.is_finite() && (self.min_flow_rate..=self.max_flow_rate).contains(&rate) {
            Ok(())
        } else {
            Err(ControlError::validation(format!(
                "flow rate {rate} outside [{}, {}]",
                self.min_flow_rate, self.max_flow_rate
            )))
        }
    }

    /// Reject a non-positive, non-finite or unrepresentable dose duration.
    pub fn check_duration(&self, duration_s: f64) -> Result<(), ControlError> {
        positive("dose duration", duration_s)?;
        secs_to_duration(duration_s).map(|_| ())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high: self.high_threshold,
            low: self.low_threshold,
            target: self.target_value,
        }
    }

    /// Return a copy with updated thresholds.
    ///
    /// Non-finite or negative values are rejected, as is `low >= high`.
    /// A target that no longer sits strictly inside the band is moved to the
    /// band's midpoint so the live controller keeps a usable setpoint.
    pub fn with_thresholds(
        &self,
        high: Option<f64>,
        low: Option<f64>,
        target: Option<f64>,
    ) -> Result<Self, ControlError> {
        let high = high.unwrap_or(self.high_threshold);
        let low = low.unwrap_or(self.low_threshold);
        let requested_target = target.unwrap_or(self.target_value);
        finite_non_negative("high_threshold", high)?;
        finite_non_negative("low_threshold", low)?;
        finite_non_negative("target_value", requested_target)?;
        if low >= high {
            return Err(ControlError::validation(format!(
                "low_threshold ({low}) must be below high_threshold ({high})"
            )));
        }
        let target_value = if low < requested_target && requested_target < high {
            requested_target
        } else {
            let mid = low + (high - low) / 2.0;
            tracing::warn!(
                requested = requested_target,
                clamped = mid,
                low,
                high,
                "target outside threshold band; clamped to midpoint"
            );
            mid
        };
        Ok(Self {
            high_threshold: high,
            low_threshold: low,
            target_value,
            ..self.clone()
        })
    }
}

/// Background loop timing and retention.
#[derive(Debug, Clone)]
pub struct LoopCfg {
    /// Period between ticks.
    pub tick: Duration,
    /// Wait after a failed tick; longer than `tick`.
    pub error_backoff: Duration,
    /// Bound on waiting for the loop thread in `stop()`.
    pub stop_timeout: Duration,
    /// Dose history ring size.
    pub history_capacity: usize,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            history_capacity: crate::history::DEFAULT_CAPACITY,
        }
    }
}

impl LoopCfg {
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.tick.is_zero() {
            return Err(ControlError::validation("tick must be > 0"));
        }
        if self.error_backoff <= self.tick {
            return Err(ControlError::validation(
                "error_backoff must be longer than tick",
            ));
        }
        if self.stop_timeout.is_zero() {
            return Err(ControlError::validation("stop_timeout must be > 0"));
        }
        if self.history_capacity == 0 {
            return Err(ControlError::validation("history_capacity must be >= 1"));
        }
        Ok(())
    }
}
