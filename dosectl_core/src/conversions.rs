//! `From` implementations bridging `dosectl_config` types to `dosectl_core` types.

use std::time::Duration;

use crate::config::{ControllerConfig, FlowCurve, LoopCfg, PidGains};

// ── FlowCurve ────────────────────────────────────────────────────────────────

impl From<dosectl_config::FlowCurve> for FlowCurve {
    fn from(c: dosectl_config::FlowCurve) -> Self {
        match c {
            dosectl_config::FlowCurve::Pid => Self::Pid,
            dosectl_config::FlowCurve::Linear => Self::Linear,
        }
    }
}

// ── PidGains ─────────────────────────────────────────────────────────────────

impl From<&dosectl_config::PidCfg> for PidGains {
    fn from(c: &dosectl_config::PidCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            integral_limit: c.integral_limit,
            output_span: c.output_span,
            min_dt_s: c.min_dt_s,
        }
    }
}

// ── ControllerConfig ─────────────────────────────────────────────────────────

impl From<&dosectl_config::Config> for ControllerConfig {
    fn from(cfg: &dosectl_config::Config) -> Self {
        let c = &cfg.controller;
        Self {
            high_threshold: c.high_threshold,
            low_threshold: c.low_threshold,
            target_value: c.target_value,
            min_dose_interval_s: c.min_dose_interval_s,
            dose_duration_s: c.dose_duration_s,
            min_flow_rate: c.min_flow_rate,
            max_flow_rate: c.max_flow_rate,
            default_flow_rate: c.default_flow_rate.unwrap_or(c.min_flow_rate),
            flow_curve: c.flow_curve.into(),
            pid: (&cfg.pid).into(),
        }
    }
}

// ── LoopCfg ──────────────────────────────────────────────────────────────────

impl From<&dosectl_config::LoopCfg> for LoopCfg {
    fn from(c: &dosectl_config::LoopCfg) -> Self {
        Self {
            tick: Duration::from_millis(c.tick_ms),
            error_backoff: Duration::from_millis(c.error_backoff_ms),
            stop_timeout: Duration::from_millis(c.stop_timeout_ms),
            history_capacity: c.history_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_config_matches_core_defaults() {
        let file = dosectl_config::Config::default();
        let core = ControllerConfig::from(&file);
        assert_eq!(core, ControllerConfig::default());
        let lc = LoopCfg::from(&file.control_loop);
        assert_eq!(lc.tick, Duration::from_secs(1));
        assert_eq!(lc.history_capacity, 1000);
    }

    #[test]
    fn explicit_default_flow_is_kept() {
        let file = dosectl_config::load_toml(
            "[controller]\ndefault_flow_rate = 90.0\nflow_curve = \"linear\"\n",
        )
        .unwrap();
        let core = ControllerConfig::from(&file);
        assert_eq!(core.default_flow_rate, 90.0);
        assert_eq!(core.flow_curve, FlowCurve::Linear);
    }
}
