//! Snapshots returned by `Controller::status` and `Controller::tick`.

use serde::Serialize;

use crate::config::{FlowCurve, Thresholds};
use crate::history::DoseRecord;
use crate::mode::Mode;
use crate::policy::AutoDecision;

/// Point-in-time view of the controller for operators and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: Mode,
    pub running: bool,
    pub paused: bool,
    /// Last good reading taken by the loop or a manual dose.
    pub current_measurement: Option<f64>,
    pub moving_average: Option<f64>,
    pub pump_running: bool,
    pub pump_flow_rate: f64,
    pub last_dose_timestamp: Option<f64>,
    pub dose_counter: u64,
    pub pid_integral: f64,
    pub pid_last_error: f64,
    pub thresholds: Thresholds,
    pub flow_curve: FlowCurve,
    pub pending_scheduled: usize,
    /// Pending plus executed entries still inside the 24 h window.
    pub retained_scheduled: usize,
    pub tick_count: u64,
    pub last_tick_error: Option<String>,
}

/// What one control tick observed and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub measurement: f64,
    pub paused: bool,
    pub scheduled: Vec<DoseRecord>,
    pub automatic: Option<DoseRecord>,
    /// `None` when the automatic gate was not consulted (paused tick).
    pub decision: Option<AutoDecision>,
    /// Scheduled or automatic actuations that failed this tick.
    pub actuation_failures: usize,
}

impl TickReport {
    pub fn doses(&self) -> usize {
        self.scheduled.len() + usize::from(self.automatic.is_some())
    }
}
