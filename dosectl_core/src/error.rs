use thiserror::Error;

use crate::mode::Mode;

/// Typed failures of the dosing controller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Bad config or schedule input; rejected synchronously.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("operation requires {required} mode, controller is in {current} mode")]
    InvalidMode { required: Mode, current: Mode },
    #[error("controller is already running")]
    AlreadyRunning,
    #[error("controller is not running")]
    NotRunning,
    /// Transient; the current tick is skipped.
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("actuation failed: {0}")]
    Actuation(String),
}

impl ControlError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing sensor")]
    MissingSensor,
    #[error("missing pump")]
    MissingPump,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
