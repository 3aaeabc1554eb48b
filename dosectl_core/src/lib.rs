#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop chemical dosing controller (hardware-agnostic).
//!
//! All hardware interactions go through `dosectl_traits::Sensor` and
//! `dosectl_traits::Pump`; time comes from an injected `Clock`.
//!
//! ## Architecture
//!
//! - **Policy**: threshold band and cooldown gate for automatic doses (`policy`)
//! - **Flow strategy**: PID-normalized or linear flow-rate curve (`flow_strategy`, `pid`)
//! - **Scheduler**: time-ordered one-shot doses, executed at most once (`scheduler`)
//! - **History**: bounded ring of completed doses (`history`)
//! - **Controller**: mode state machine, actuation and command surface (`controller`)
//! - **Runner**: the background tick loop with bounded shutdown (`runner`)

pub mod audit;
pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod flow_strategy;
pub mod history;
pub mod hw_error;
pub mod mocks;
pub mod mode;
pub mod pid;
pub mod policy;
mod runner;
pub mod scheduler;
pub mod status;
pub mod util;

pub use audit::{AuditSink, ChannelSink, TracingSink};
pub use builder::{ControllerBuilder, Missing, Set};
pub use config::{ControllerConfig, FlowCurve, LoopCfg, PidGains, Thresholds};
pub use controller::Controller;
pub use error::{BuildError, ControlError, Report, Result};
pub use flow_strategy::{FlowStrategy, LinearFlow, PidFlow, strategy_for};
pub use history::{DoseHistory, DoseKind, DoseRecord, HistorySummary};
pub use mode::{ControllerState, Mode};
pub use pid::PidEngine;
pub use policy::{AutoDecision, DoseRequest, evaluate, should_auto_dose};
pub use scheduler::{DoseScheduler, ScheduledDose};
pub use status::{ControllerStatus, TickReport};
