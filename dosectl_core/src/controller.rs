//! The dosing controller: command surface, control tick and actuation.
//!
//! One `Controller` owns one sensor, one pump and one state lock. The
//! background loop (see `runner`) and every command share the same
//! `Shared` value. Locks are always taken in the order
//! worker → sensor → pump → core, and the core lock is never held across a
//! sensor or pump call.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dosectl_traits::{Clock, Pump, Sensor};
use eyre::WrapErr;

use crate::audit::AuditSink;
use crate::builder::{ControllerBuilder, Missing};
use crate::config::{ControllerConfig, LoopCfg, Thresholds};
use crate::error::{ControlError, Report, Result};
use crate::flow_strategy::{FlowStrategy, strategy_for};
use crate::history::{DoseHistory, DoseKind, DoseRecord, HistorySummary};
use crate::hw_error::{map_pump_error, map_sensor_error};
use crate::mode::{ControllerState, Mode};
use crate::policy::{self, AutoDecision, DoseRequest};
use crate::runner::Worker;
use crate::scheduler::{DoseScheduler, ScheduledDose};
use crate::status::{ControllerStatus, TickReport};
use crate::util::{clamp_f64, lock, secs_to_duration};

/// Everything guarded by the controller's state lock.
pub(crate) struct Core {
    pub(crate) config: ControllerConfig,
    pub(crate) state: ControllerState,
    pub(crate) scheduler: DoseScheduler,
    pub(crate) history: DoseHistory,
    pub(crate) strategy: Box<dyn FlowStrategy>,
}

impl Core {
    /// Mirror the strategy's PID accumulators into the reported state.
    fn sync_pid(&mut self) {
        match self.strategy.pid() {
            Some(pid) => {
                self.state.pid_integral = pid.integral();
                self.state.pid_last_error = pid.last_error();
                self.state.pid_last_timestamp = pid.last_timestamp();
            }
            None => {
                self.state.pid_integral = 0.0;
                self.state.pid_last_error = 0.0;
                self.state.pid_last_timestamp = None;
            }
        }
    }

    fn reset_strategy(&mut self, now: f64) {
        self.strategy.reset(now);
        self.sync_pid();
    }
}

/// State shared between the command surface and the loop thread.
pub(crate) struct Shared {
    pub(crate) core: Mutex<Core>,
    pub(crate) sensor: Mutex<Box<dyn Sensor + Send>>,
    pub(crate) pump: Mutex<Box<dyn Pump + Send>>,
    pub(crate) audit: Option<Box<dyn AuditSink>>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) loop_cfg: LoopCfg,
}

impl Shared {
    /// One control iteration; the outcome is recorded in `last_tick_error`.
    ///
    /// `cancel` belongs to the loop thread that runs the tick. Once it is set,
    /// the tick stops before touching the pump or the schedule.
    pub(crate) fn tick(
        &self,
        cancel: Option<&AtomicBool>,
    ) -> std::result::Result<TickReport, ControlError> {
        let out = self.tick_inner(cancel);
        lock(&self.core).state.last_tick_error = out.as_ref().err().map(ToString::to_string);
        out
    }

    fn tick_inner(
        &self,
        cancel: Option<&AtomicBool>,
    ) -> std::result::Result<TickReport, ControlError> {
        let now = self.clock.now();
        lock(&self.core).state.tick_count += 1;

        let reading = lock(&self.sensor).get_reading();
        let measurement = match reading {
            Ok(v) if v.is_finite() => v,
            Ok(v) => {
                return Err(ControlError::SensorUnavailable(format!(
                    "non-finite reading {v}"
                )));
            }
            Err(e) => return Err(map_sensor_error(&*e)),
        };

        let mut report = TickReport {
            measurement,
            ..TickReport::default()
        };
        // Held through every actuation of this tick; `stop()` waits on it.
        let mut pump = lock(&self.pump);
        if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
            tracing::debug!("loop stopped during tick; no actuation");
            return Ok(report);
        }

        let (due, default_flow) = {
            let mut core = lock(&self.core);
            core.state.last_measurement = Some(measurement);
            if core.state.paused {
                report.paused = true;
                return Ok(report);
            }
            (core.scheduler.check_due(now), core.config.default_flow_rate)
        };

        for entry in due {
            let flow = entry.flow_rate.unwrap_or(default_flow);
            let req = DoseRequest {
                duration_s: entry.duration_s,
                flow_rate: flow,
            };
            match self.actuate(&mut **pump, DoseKind::Scheduled, req, Some(measurement), now) {
                Ok(rec) => report.scheduled.push(rec),
                Err(e) => {
                    tracing::warn!(id = entry.id, error = %e, "scheduled dose failed");
                    report.actuation_failures += 1;
                }
            }
        }

        let request = {
            let mut guard = lock(&self.core);
            let core = &mut *guard;
            let decision = policy::evaluate(&core.config, &core.state, measurement, now);
            report.decision = Some(decision);
            match decision {
                AutoDecision::BelowLow => tracing::debug!(
                    measurement,
                    low = core.config.low_threshold,
                    "below low threshold; automatic dose skipped"
                ),
                AutoDecision::Cooldown { remaining_s } => {
                    tracing::trace!(remaining_s, "automatic dose in cooldown");
                }
                _ => {}
            }
            if decision == AutoDecision::Dose {
                let raw = core.strategy.flow_rate(&core.config, measurement, now);
                core.sync_pid();
                Some(DoseRequest {
                    duration_s: core.config.dose_duration_s,
                    flow_rate: clamp_f64(raw, core.config.min_flow_rate, core.config.max_flow_rate),
                })
            } else {
                None
            }
        };

        if let Some(req) = request {
            match self.actuate(&mut **pump, DoseKind::Automatic, req, Some(measurement), now) {
                Ok(rec) => report.automatic = Some(rec),
                Err(e) => {
                    tracing::warn!(measurement, error = %e, "automatic dose failed");
                    report.actuation_failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Drive the pump and record a successful dose. The caller holds the pump lock.
    fn actuate(
        &self,
        pump: &mut (dyn Pump + Send),
        kind: DoseKind,
        req: DoseRequest,
        measurement_before: Option<f64>,
        now: f64,
    ) -> std::result::Result<DoseRecord, ControlError> {
        let duration = secs_to_duration(req.duration_s)?;
        pump.set_flow_rate(req.flow_rate)
            .map_err(|e| map_pump_error(&*e))?;
        pump.start(duration).map_err(|e| map_pump_error(&*e))?;

        let record = DoseRecord {
            timestamp: now,
            kind,
            duration_s: req.duration_s,
            flow_rate: req.flow_rate,
            measurement_before,
        };
        let counter = {
            let mut core = lock(&self.core);
            core.state.last_dose_timestamp = Some(now);
            core.state.dose_counter += 1;
            core.history.push(record.clone());
            core.state.dose_counter
        };
        tracing::info!(
            kind = ?kind,
            duration_s = req.duration_s,
            flow_rate = req.flow_rate,
            measurement_before,
            dose_counter = counter,
            "dose started"
        );
        self.notify(&record);
        Ok(record)
    }

    fn notify(&self, record: &DoseRecord) {
        let Some(sink) = &self.audit else { return };
        match catch_unwind(AssertUnwindSafe(|| sink.record(record))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "audit sink rejected dose record"),
            Err(_) => tracing::warn!("audit sink panicked"),
        }
    }
}

/// Closed-loop dosing controller.
///
/// Commands take `&self`, so a controller can sit behind an `Arc` and be
/// driven from several threads while its loop runs.
pub struct Controller {
    pub(crate) shared: Arc<Shared>,
    pub(crate) worker: Mutex<Option<Worker>>,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let core = lock(&self.shared.core);
        f.debug_struct("Controller")
            .field("mode", &core.state.mode)
            .field("running", &core.state.running)
            .field("paused", &core.state.paused)
            .field("dose_counter", &core.state.dose_counter)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<Missing, Missing> {
        ControllerBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        sensor: Box<dyn Sensor + Send>,
        pump: Box<dyn Pump + Send>,
        config: ControllerConfig,
        loop_cfg: LoopCfg,
        clock: Arc<dyn Clock + Send + Sync>,
        audit: Option<Box<dyn AuditSink>>,
        strategy: Option<Box<dyn FlowStrategy>>,
        mode: Mode,
    ) -> Self {
        let strategy = strategy.unwrap_or_else(|| strategy_for(&config));
        let mut core = Core {
            history: DoseHistory::with_capacity(loop_cfg.history_capacity),
            scheduler: DoseScheduler::new(),
            state: ControllerState {
                mode,
                ..ControllerState::default()
            },
            config,
            strategy,
        };
        core.sync_pid();
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                sensor: Mutex::new(sensor),
                pump: Mutex::new(pump),
                audit,
                clock,
                loop_cfg,
            }),
            worker: Mutex::new(None),
        }
    }

    fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Enter `mode` and launch the background loop.
    pub fn start(&self, mode: Mode) -> Result<()> {
        let mut worker = lock(&self.worker);
        let previous = {
            let core = lock(&self.shared.core);
            if core.state.running {
                return Err(Report::new(ControlError::AlreadyRunning));
            }
            core.state.mode
        };
        if previous != mode {
            if let Err(e) = lock(&self.shared.pump).stop() {
                tracing::warn!(error = %e, "pump stop on mode change failed");
            }
        }
        {
            let now = self.now();
            let mut core = lock(&self.shared.core);
            core.state.running = true;
            core.state.mode = mode;
            core.reset_strategy(now);
        }
        match Worker::spawn(Arc::clone(&self.shared)) {
            Ok(w) => *worker = Some(w),
            Err(e) => {
                lock(&self.shared.core).state.running = false;
                return Err(Report::new(e)).wrap_err("failed to spawn control loop");
            }
        }
        tracing::info!(%mode, tick = ?self.shared.loop_cfg.tick, "controller started");
        Ok(())
    }

    /// Halt the loop (bounded wait) and force the pump off.
    ///
    /// The pump is commanded to stop even if the loop did not exit in time.
    /// A pump failure is returned after the controller is marked stopped.
    pub fn stop(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if !lock(&self.shared.core).state.running {
            return Err(Report::new(ControlError::NotRunning));
        }
        if let Some(w) = worker.take() {
            w.shutdown(self.shared.loop_cfg.stop_timeout);
        }
        let stopped = lock(&self.shared.pump).stop();
        lock(&self.shared.core).state.running = false;
        tracing::info!("controller stopped");
        stopped.map_err(|e| Report::new(map_pump_error(&*e)))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.core).state.running
    }

    /// Switch mode. The pump is always stopped first. Entering `Automatic`
    /// from `Disabled` resets the flow strategy; coming back from `Manual`
    /// keeps its accumulators.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut pump = lock(&self.shared.pump);
        let stopped = pump.stop();
        let now = self.now();
        let previous = {
            let mut core = lock(&self.shared.core);
            let previous = core.state.mode;
            core.state.mode = mode;
            if mode == Mode::Automatic && previous == Mode::Disabled {
                core.reset_strategy(now);
            }
            previous
        };
        drop(pump);
        tracing::info!(from = %previous, to = %mode, "mode changed");
        stopped.map_err(|e| Report::new(map_pump_error(&*e)))
    }

    pub fn mode(&self) -> Mode {
        lock(&self.shared.core).state.mode
    }

    /// Suspend scheduled and automatic dosing; the loop keeps reading the sensor.
    pub fn pause(&self) {
        lock(&self.shared.core).state.paused = true;
        tracing::info!("dosing paused");
    }

    pub fn resume(&self) {
        lock(&self.shared.core).state.paused = false;
        tracing::info!("dosing resumed");
    }

    // ── Dosing ───────────────────────────────────────────────────────────────

    /// Run one control iteration on the caller's thread.
    ///
    /// The background loop calls the same code; calling this directly gives
    /// deterministic control in tests and simulations.
    pub fn tick(&self) -> Result<TickReport> {
        self.shared.tick(None).map_err(Report::new)
    }

    /// Operator dose. Only legal in `Manual` mode; skips cooldown and thresholds.
    pub fn manual_dose(&self, duration_s: f64, flow_rate: Option<f64>) -> Result<DoseRecord> {
        let (mode, cfg) = {
            let core = lock(&self.shared.core);
            (core.state.mode, core.config.clone())
        };
        if mode != Mode::Manual {
            return Err(Report::new(ControlError::InvalidMode {
                required: Mode::Manual,
                current: mode,
            }));
        }
        cfg.check_duration(duration_s)?;
        let flow = match flow_rate {
            Some(rate) => {
                cfg.check_flow_rate(rate)?;
                rate
            }
            None => cfg.default_flow_rate,
        };

        // A failed read only loses the "before" annotation.
        let measurement = lock(&self.shared.sensor)
            .get_reading()
            .ok()
            .filter(|v| v.is_finite());

        let mut pump = lock(&self.shared.pump);
        {
            let mut core = lock(&self.shared.core);
            if core.state.mode != Mode::Manual {
                return Err(Report::new(ControlError::InvalidMode {
                    required: Mode::Manual,
                    current: core.state.mode,
                }));
            }
            if measurement.is_some() {
                core.state.last_measurement = measurement;
            }
        }
        let req = DoseRequest {
            duration_s,
            flow_rate: flow,
        };
        let now = self.now();
        Ok(self
            .shared
            .actuate(&mut **pump, DoseKind::Manual, req, measurement, now)?)
    }

    /// Queue a dose at an absolute timestamp on the controller's clock.
    pub fn schedule(
        &self,
        due_timestamp: f64,
        duration_s: f64,
        flow_rate: Option<f64>,
    ) -> Result<ScheduledDose> {
        let mut guard = lock(&self.shared.core);
        let core = &mut *guard;
        let entry = core
            .scheduler
            .schedule(due_timestamp, duration_s, flow_rate, &core.config)?;
        tracing::debug!(id = entry.id, due = entry.due_timestamp, duration_s, "dose scheduled");
        Ok(entry)
    }

    /// Queue a dose `offset_s` seconds from now (negative means already due).
    pub fn schedule_in(
        &self,
        offset_s: f64,
        duration_s: f64,
        flow_rate: Option<f64>,
    ) -> Result<ScheduledDose> {
        self.schedule(self.now() + offset_s, duration_s, flow_rate)
    }

    /// Pending and recently executed entries, pruning executed ones older than a day.
    pub fn list_scheduled(&self) -> Vec<ScheduledDose> {
        let now = self.now();
        lock(&self.shared.core).scheduler.list_pending(now)
    }

    /// Remove a pending entry. Returns `false` if it is unknown or already ran.
    pub fn cancel_scheduled(&self, id: u64) -> bool {
        lock(&self.shared.core).scheduler.cancel(id)
    }

    // ── Configuration ────────────────────────────────────────────────────────

    /// Update any of the thresholds; see `ControllerConfig::with_thresholds`.
    pub fn set_thresholds(
        &self,
        high: Option<f64>,
        low: Option<f64>,
        target: Option<f64>,
    ) -> Result<Thresholds> {
        let mut core = lock(&self.shared.core);
        let updated = core.config.with_thresholds(high, low, target)?;
        let t = updated.thresholds();
        core.config = updated;
        tracing::info!(high = t.high, low = t.low, target = t.target, "thresholds updated");
        Ok(t)
    }

    /// Replace the whole configuration. A changed flow curve swaps the strategy.
    pub fn update_config(&self, config: ControllerConfig) -> Result<()> {
        config.validate()?;
        let now = self.now();
        let mut core = lock(&self.shared.core);
        if config.flow_curve != core.strategy.curve() {
            core.strategy = strategy_for(&config);
            core.config = config;
            core.reset_strategy(now);
        } else {
            core.config = config;
        }
        tracing::info!(flow_curve = ?core.config.flow_curve, "configuration replaced");
        Ok(())
    }

    pub fn reset_pid(&self) {
        let now = self.now();
        lock(&self.shared.core).reset_strategy(now);
        tracing::debug!("flow strategy reset");
    }

    pub fn config(&self) -> ControllerConfig {
        lock(&self.shared.core).config.clone()
    }

    // ── Reporting ────────────────────────────────────────────────────────────

    pub fn state(&self) -> ControllerState {
        lock(&self.shared.core).state.clone()
    }

    /// Take a fresh sensor reading outside the loop.
    pub fn read_measurement(&self) -> Result<f64> {
        let reading = lock(&self.shared.sensor).get_reading();
        let v = reading.map_err(|e| Report::new(map_sensor_error(&*e)))?;
        if !v.is_finite() {
            return Err(Report::new(ControlError::SensorUnavailable(format!(
                "non-finite reading {v}"
            ))));
        }
        lock(&self.shared.core).state.last_measurement = Some(v);
        Ok(v)
    }

    /// Snapshot for display. Also prunes day-old executed schedule entries.
    pub fn status(&self) -> ControllerStatus {
        let now = self.now();
        let moving_average = lock(&self.shared.sensor).moving_average();
        let (pump_running, pump_flow_rate) = {
            let pump = lock(&self.shared.pump);
            (pump.is_running(), pump.flow_rate())
        };
        let mut core = lock(&self.shared.core);
        core.scheduler.prune(now);
        let st = &core.state;
        ControllerStatus {
            mode: st.mode,
            running: st.running,
            paused: st.paused,
            current_measurement: st.last_measurement,
            moving_average,
            pump_running,
            pump_flow_rate,
            last_dose_timestamp: st.last_dose_timestamp,
            dose_counter: st.dose_counter,
            pid_integral: st.pid_integral,
            pid_last_error: st.pid_last_error,
            thresholds: core.config.thresholds(),
            flow_curve: core.config.flow_curve,
            pending_scheduled: core.scheduler.pending_count(),
            retained_scheduled: core.scheduler.len(),
            tick_count: st.tick_count,
            last_tick_error: st.last_tick_error.clone(),
        }
    }

    /// All retained dose records, oldest first.
    pub fn history(&self) -> Vec<DoseRecord> {
        lock(&self.shared.core).history.iter().cloned().collect()
    }

    pub fn recent_doses(&self, n: usize) -> Vec<DoseRecord> {
        lock(&self.shared.core).history.recent(n)
    }

    pub fn history_summary(&self, since: Option<f64>) -> HistorySummary {
        lock(&self.shared.core).history.summary(since)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(w) = worker {
            w.shutdown(self.shared.loop_cfg.stop_timeout);
            if let Err(e) = lock(&self.shared.pump).stop() {
                tracing::warn!(error = %e, "pump stop on drop failed");
            }
            lock(&self.shared.core).state.running = false;
        }
    }
}
