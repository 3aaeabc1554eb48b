#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and schedule parsing for the dosing controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Schedule CSV loader enforces headers and rejects malformed rows up front,
//!   since imported doses run unattended.
use serde::Deserialize;

/// Flow-rate curve used for automatic doses.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowCurve {
    #[default]
    Pid,
    Linear,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerCfg {
    /// Dose when the measurement rises above this (NTU).
    pub high_threshold: f64,
    /// Below this the water is considered clean; automatic dosing is skipped.
    pub low_threshold: f64,
    /// PID setpoint.
    pub target_value: f64,
    /// Cooldown between automatic doses (s).
    pub min_dose_interval_s: f64,
    /// Duration of an automatic dose (s).
    pub dose_duration_s: f64,
    /// Pump range (ml/h).
    pub min_flow_rate: f64,
    pub max_flow_rate: f64,
    /// Flow used by scheduled/manual doses that do not name one. Defaults to `min_flow_rate`.
    pub default_flow_rate: Option<f64>,
    pub flow_curve: FlowCurve,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            high_threshold: 0.25,
            low_threshold: 0.12,
            target_value: 0.15,
            min_dose_interval_s: 300.0,
            dose_duration_s: 30.0,
            min_flow_rate: 60.0,
            max_flow_rate: 150.0,
            default_flow_rate: None,
            flow_curve: FlowCurve::Pid,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Symmetric clamp on the integral accumulator (error·s).
    pub integral_limit: f64,
    /// Raw output magnitude that maps to the full flow range.
    pub output_span: f64,
    /// Floor for the derivative time step (s).
    pub min_dt_s: f64,
}

impl Default for PidCfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoopCfg {
    /// Control loop period (ms).
    pub tick_ms: u64,
    /// Pause after a failed tick (ms); must exceed `tick_ms`.
    pub error_backoff_ms: u64,
    /// Upper bound on waiting for the loop thread in `stop()` (ms).
    pub stop_timeout_ms: u64,
    /// Dose history ring size.
    pub history_capacity: usize,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            error_backoff_ms: 5000,
            stop_timeout_ms: 2000,
            history_capacity: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters for the simulated basin used by the CLI.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    pub initial_turbidity: f64,
    pub drift_per_s: f64,
    pub removal_per_ml: f64,
    pub floor: f64,
    pub average_window: usize,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            initial_turbidity: 0.30,
            drift_per_s: 0.0001,
            removal_per_ml: 0.05,
            floor: 0.05,
            average_window: 10,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerCfg,
    pub pid: PidCfg,
    #[serde(rename = "loop")]
    pub control_loop: LoopCfg,
    pub logging: Logging,
    pub simulation: SimulationCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// One row of a schedule CSV.
///
/// Expected headers:
/// offset_s,duration_s,flow_rate
///
/// `offset_s` is relative to the moment the schedule is applied and may be
/// negative (catch-up). `flow_rate` may be left empty to use the default.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ScheduleRow {
    pub offset_s: f64,
    pub duration_s: f64,
    pub flow_rate: Option<f64>,
}

pub fn load_schedule_csv(path: &std::path::Path) -> eyre::Result<Vec<ScheduleRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["offset_s", "duration_s", "flow_rate"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "schedule CSV must have headers 'offset_s,duration_s,flow_rate', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScheduleRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if !row.offset_s.is_finite() {
            eyre::bail!("invalid CSV row {}: offset_s must be finite", idx + 2);
        }
        rows.push(row);
    }
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let c = &self.controller;
        // Controller
        for (name, v) in [
            ("high_threshold", c.high_threshold),
            ("low_threshold", c.low_threshold),
            ("target_value", c.target_value),
            ("min_flow_rate", c.min_flow_rate),
            ("max_flow_rate", c.max_flow_rate),
        ] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("controller.{name} must be a finite value >= 0");
            }
        }
        if !(c.low_threshold < c.target_value && c.target_value < c.high_threshold) {
            eyre::bail!("controller thresholds must satisfy low_threshold < target_value < high_threshold");
        }
        if c.min_flow_rate > c.max_flow_rate {
            eyre::bail!("controller.min_flow_rate must be <= max_flow_rate");
        }
        if !(c.min_dose_interval_s.is_finite() && c.min_dose_interval_s > 0.0) {
            eyre::bail!("controller.min_dose_interval_s must be > 0");
        }
        if !(c.dose_duration_s.is_finite() && c.dose_duration_s > 0.0) {
            eyre::bail!("controller.dose_duration_s must be > 0");
        }
        if std::time::Duration::try_from_secs_f64(c.dose_duration_s).is_err() {
            eyre::bail!("controller.dose_duration_s is too large");
        }
        if let Some(f) = c.default_flow_rate {
            if !(c.min_flow_rate..=c.max_flow_rate).contains(&f) {
                eyre::bail!("controller.default_flow_rate must be within [min_flow_rate, max_flow_rate]");
            }
        }

        // PID
        for (name, v) in [("kp", self.pid.kp), ("ki", self.pid.ki), ("kd", self.pid.kd)] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("pid.{name} must be a finite value >= 0");
            }
        }
        if !(self.pid.integral_limit.is_finite() && self.pid.integral_limit > 0.0) {
            eyre::bail!("pid.integral_limit must be > 0");
        }
        if !(self.pid.output_span.is_finite() && self.pid.output_span > 0.0) {
            eyre::bail!("pid.output_span must be > 0");
        }
        if !(self.pid.min_dt_s.is_finite() && self.pid.min_dt_s > 0.0) {
            eyre::bail!("pid.min_dt_s must be > 0");
        }

        // Loop
        let l = &self.control_loop;
        if l.tick_ms == 0 {
            eyre::bail!("loop.tick_ms must be >= 1");
        }
        if l.error_backoff_ms <= l.tick_ms {
            eyre::bail!("loop.error_backoff_ms must be greater than loop.tick_ms");
        }
        if l.stop_timeout_ms == 0 {
            eyre::bail!("loop.stop_timeout_ms must be >= 1");
        }
        if l.history_capacity == 0 {
            eyre::bail!("loop.history_capacity must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref() {
            if !matches!(r, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly");
            }
        }

        // Simulation
        if self.simulation.average_window == 0 {
            eyre::bail!("simulation.average_window must be >= 1");
        }
        if !(self.simulation.floor.is_finite() && self.simulation.floor >= 0.0) {
            eyre::bail!("simulation.floor must be >= 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").expect("parse");
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.controller.flow_curve, FlowCurve::Pid);
        assert_eq!(cfg.control_loop.tick_ms, 1000);
    }

    #[test]
    fn flow_curve_parses_lowercase() {
        let cfg = load_toml("[controller]\nflow_curve = \"linear\"\n").expect("parse");
        assert_eq!(cfg.controller.flow_curve, FlowCurve::Linear);
    }
}
