//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dosectl_core::Mode;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dosectl", version, about = "Coagulant dosing controller (simulated basin)")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit JSON lines (status, summary, errors and logs) instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Operating mode accepted on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Disabled,
    Manual,
    Automatic,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Disabled => Self::Disabled,
            ModeArg::Manual => Self::Manual,
            ModeArg::Automatic => Self::Automatic,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against the simulated basin
    Run {
        /// Operating mode for the run
        #[arg(long, value_enum, default_value = "automatic")]
        mode: ModeArg,
        /// Stop after this many seconds (Ctrl-C stops earlier)
        #[arg(long, value_name = "SECS", default_value_t = 10.0)]
        seconds: f64,
        /// Schedule CSV (offset_s,duration_s,flow_rate) applied at start
        #[arg(long, value_name = "FILE")]
        schedule: Option<PathBuf>,
        /// Issue one manual dose of this many seconds right after start (manual mode)
        #[arg(long = "manual-dose", value_name = "SECS")]
        manual_dose: Option<f64>,
        /// Flow rate for --manual-dose (ml/h); config default when omitted
        #[arg(long, value_name = "ML_PER_H", requires = "manual_dose")]
        flow: Option<f64>,
        /// Interval between status lines
        #[arg(long = "status-ms", value_name = "MS", default_value_t = 1000)]
        status_ms: u64,
    },
    /// Quick health check: one sensor read and one pump round-trip
    SelfCheck,
    /// Load and validate the config, then print the effective settings
    CheckConfig,
}
