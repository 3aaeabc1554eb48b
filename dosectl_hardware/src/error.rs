use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("sensor read timeout")]
    Timeout,
    #[error("sensor fault: {0}")]
    SensorFault(String),
    #[error("pump fault: {0}")]
    PumpFault(String),
    #[error("flow rate {0} ml/h outside pump range")]
    InvalidFlowRate(f64),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
