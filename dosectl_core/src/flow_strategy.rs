//! Pluggable flow-rate curves for automatic doses.
//!
//! The controller asks its strategy for a flow rate only after the threshold
//! policy has decided a dose is warranted. Which curve is authoritative is a
//! site decision, so it is selected by `ControllerConfig::flow_curve`.

use crate::config::{ControllerConfig, FlowCurve};
use crate::pid::PidEngine;
use crate::util::clamp_f64;

pub trait FlowStrategy: Send {
    /// Flow rate (ml/h) for an automatic dose at `measurement`.
    /// Implementations must stay within `[min_flow_rate, max_flow_rate]`.
    fn flow_rate(&mut self, cfg: &ControllerConfig, measurement: f64, now: f64) -> f64;

    /// Forget accumulated state (after a disturbance or a manual override).
    fn reset(&mut self, now: f64);

    /// PID accumulators, for strategies that keep them.
    fn pid(&self) -> Option<&PidEngine> {
        None
    }

    fn curve(&self) -> FlowCurve;
}

/// PID-normalized flow rate.
#[derive(Debug, Clone)]
pub struct PidFlow {
    engine: PidEngine,
}

impl PidFlow {
    pub fn new(cfg: &ControllerConfig) -> Self {
        Self {
            engine: PidEngine::new(cfg.pid),
        }
    }
}

impl FlowStrategy for PidFlow {
    fn flow_rate(&mut self, cfg: &ControllerConfig, measurement: f64, now: f64) -> f64 {
        // Gains may have been replaced through update_config.
        self.engine.set_gains(cfg.pid);
        self.engine.compute(
            cfg.target_value,
            measurement,
            now,
            cfg.min_flow_rate,
            cfg.max_flow_rate,
        )
    }

    fn reset(&mut self, now: f64) {
        self.engine.reset(now);
    }

    fn pid(&self) -> Option<&PidEngine> {
        Some(&self.engine)
    }

    fn curve(&self) -> FlowCurve {
        FlowCurve::Pid
    }
}

/// Linear interpolation: minimum flow at the high threshold, maximum flow once
/// the excursion above it equals the width of the `low..high` band.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFlow;

impl FlowStrategy for LinearFlow {
    fn flow_rate(&mut self, cfg: &ControllerConfig, measurement: f64, _now: f64) -> f64 {
        let band = cfg.high_threshold - cfg.low_threshold;
        let fraction = if band > 0.0 {
            clamp_f64((measurement - cfg.high_threshold) / band, 0.0, 1.0)
        } else {
            1.0
        };
        clamp_f64(
            cfg.min_flow_rate + fraction * (cfg.max_flow_rate - cfg.min_flow_rate),
            cfg.min_flow_rate,
            cfg.max_flow_rate,
        )
    }

    fn reset(&mut self, _now: f64) {}

    fn curve(&self) -> FlowCurve {
        FlowCurve::Linear
    }
}

/// Build the strategy named by `cfg.flow_curve`.
pub fn strategy_for(cfg: &ControllerConfig) -> Box<dyn FlowStrategy> {
    match cfg.flow_curve {
        FlowCurve::Pid => Box::new(PidFlow::new(cfg)),
        FlowCurve::Linear => Box::new(LinearFlow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.25, 60.0)]
    #[case(0.315, 105.0)]
    #[case(0.38, 150.0)]
    #[case(2.0, 150.0)]
    #[case(f64::NAN, 60.0)]
    fn linear_curve_interpolates_excursion(#[case] measurement: f64, #[case] expected: f64) {
        let cfg = ControllerConfig::default();
        let flow = LinearFlow.flow_rate(&cfg, measurement, 0.0);
        assert!((flow - expected).abs() < 1e-9, "{measurement} -> {flow}");
    }

    #[test]
    fn factory_follows_config() {
        let mut cfg = ControllerConfig::default();
        assert_eq!(strategy_for(&cfg).curve(), FlowCurve::Pid);
        assert!(strategy_for(&cfg).pid().is_some());
        cfg.flow_curve = FlowCurve::Linear;
        assert_eq!(strategy_for(&cfg).curve(), FlowCurve::Linear);
        assert!(strategy_for(&cfg).pid().is_none());
    }

    #[test]
    fn pid_flow_picks_up_new_gains() {
        let mut cfg = ControllerConfig::default();
        let mut strategy = PidFlow::new(&cfg);
        strategy.reset(0.0);
        cfg.pid.kp = 1000.0;
        let flow = strategy.flow_rate(&cfg, 0.30, 1.0);
        assert_eq!(flow, cfg.max_flow_rate);
        assert_eq!(strategy.pid().map(|p| p.gains().kp), Some(1000.0));
    }
}
