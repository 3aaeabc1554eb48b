//! Fire-and-forget sinks for dose events.
//!
//! A sink failure is logged by the controller and never changes dosing.

use crossbeam_channel as xch;

use crate::history::DoseRecord;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

pub trait AuditSink: Send + Sync {
    fn record(&self, dose: &DoseRecord) -> Result<(), SinkError>;
}

/// Emits each dose as a structured `tracing` event under the `dosectl::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, dose: &DoseRecord) -> Result<(), SinkError> {
        tracing::info!(
            target: "dosectl::audit",
            timestamp = dose.timestamp,
            kind = ?dose.kind,
            duration_s = dose.duration_s,
            flow_rate = dose.flow_rate,
            measurement_before = dose.measurement_before,
            volume_ml = dose.volume_ml(),
            "dose"
        );
        Ok(())
    }
}

/// Forwards dose records over a bounded channel without blocking.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: xch::Sender<DoseRecord>,
}

impl ChannelSink {
    pub fn bounded(cap: usize) -> (Self, xch::Receiver<DoseRecord>) {
        let (tx, rx) = xch::bounded(cap);
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelSink {
    fn record(&self, dose: &DoseRecord) -> Result<(), SinkError> {
        self.tx
            .try_send(dose.clone())
            .map_err(|e| -> SinkError { format!("audit channel: {e}").into() })
    }
}
