//! Type-state builder for `Controller`.
//!
//! `build()` only exists once a sensor and a pump have been supplied.
//! `try_build()` is always available and reports what is missing at runtime.

use std::marker::PhantomData;
use std::sync::Arc;

use dosectl_traits::{Clock, Pump, Sensor, SystemClock};

use crate::audit::AuditSink;
use crate::config::{ControllerConfig, LoopCfg};
use crate::controller::Controller;
use crate::error::{BuildError, Report, Result};
use crate::flow_strategy::FlowStrategy;
use crate::mode::Mode;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Controller`. Configuration is validated on build.
pub struct ControllerBuilder<S, P> {
    sensor: Option<Box<dyn Sensor + Send>>,
    pump: Option<Box<dyn Pump + Send>>,
    config: Option<ControllerConfig>,
    loop_cfg: Option<LoopCfg>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    audit: Option<Box<dyn AuditSink>>,
    strategy: Option<Box<dyn FlowStrategy>>,
    mode: Mode,
    _s: PhantomData<S>,
    _p: PhantomData<P>,
}

impl Default for ControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            pump: None,
            config: None,
            loop_cfg: None,
            clock: None,
            audit: None,
            strategy: None,
            mode: Mode::Disabled,
            _s: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<S, P> ControllerBuilder<S, P> {
    fn retag<S2, P2>(self) -> ControllerBuilder<S2, P2> {
        ControllerBuilder {
            sensor: self.sensor,
            pump: self.pump,
            config: self.config,
            loop_cfg: self.loop_cfg,
            clock: self.clock,
            audit: self.audit,
            strategy: self.strategy,
            mode: self.mode,
            _s: PhantomData,
            _p: PhantomData,
        }
    }

    pub fn with_sensor(mut self, sensor: impl Sensor + Send + 'static) -> ControllerBuilder<Set, P> {
        self.sensor = Some(Box::new(sensor));
        self.retag()
    }

    pub fn with_pump(mut self, pump: impl Pump + Send + 'static) -> ControllerBuilder<S, Set> {
        self.pump = Some(Box::new(pump));
        self.retag()
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_loop(mut self, loop_cfg: LoopCfg) -> Self {
        self.loop_cfg = Some(loop_cfg);
        self
    }

    /// Inject a clock; defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_audit(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(Box::new(sink));
        self
    }

    /// Override the flow strategy normally chosen from `ControllerConfig::flow_curve`.
    pub fn with_flow_strategy(mut self, strategy: Box<dyn FlowStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Mode the controller starts in, before any `start` call.
    pub fn with_initial_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate and construct, reporting missing parts as `BuildError`.
    pub fn try_build(self) -> Result<Controller> {
        let sensor = self
            .sensor
            .ok_or_else(|| Report::new(BuildError::MissingSensor))?;
        let pump = self.pump.ok_or_else(|| Report::new(BuildError::MissingPump))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let loop_cfg = self.loop_cfg.unwrap_or_default();
        loop_cfg.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        Ok(Controller::from_parts(
            sensor,
            pump,
            config,
            loop_cfg,
            clock,
            self.audit,
            self.strategy,
            self.mode,
        ))
    }
}

impl ControllerBuilder<Set, Set> {
    pub fn build(self) -> Result<Controller> {
        self.try_build()
    }
}
