//! Background control loop.
//!
//! One named thread ticks the controller at `LoopCfg::tick`. The wait between
//! ticks is a receive on the stop channel, so `shutdown` wakes the thread
//! immediately instead of waiting out the sleep. A failed or panicking tick
//! never ends the loop; it only lengthens the next wait to `error_backoff`.
//! A tick still running after `shutdown` gives up at the pump lock, so a
//! detached thread cannot restart the pump behind `stop()`.
use crossbeam_channel as xch;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::controller::Shared;
use crate::error::ControlError;
use crate::util::lock;

pub(crate) struct Worker {
    stop_tx: xch::Sender<()>,
    // Checked by an in-flight tick before it actuates.
    cancelled: Arc<AtomicBool>,
    done_rx: xch::Receiver<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = xch::bounded::<()>(1);
        let (done_tx, done_rx) = xch::bounded::<()>(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let loop_cancelled = Arc::clone(&cancelled);
        let join_handle = std::thread::Builder::new()
            .name("dosectl-loop".into())
            .spawn(move || {
                run_loop(&shared, &stop_rx, &loop_cancelled);
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            stop_tx,
            cancelled,
            done_rx,
            join_handle: Some(join_handle),
        })
    }

    /// Signal the loop and wait up to `timeout` for it to finish its tick.
    /// A loop that does not exit in time is detached.
    pub(crate) fn shutdown(mut self, timeout: Duration) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.join_handle.take() {
                    match handle.join() {
                        Ok(()) => tracing::trace!("control loop joined"),
                        Err(e) => tracing::warn!(?e, "control loop thread panicked"),
                    }
                }
            }
            Err(xch::RecvTimeoutError::Timeout) => {
                self.join_handle.take();
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "control loop did not stop in time; detaching"
                );
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Detached or dropped without shutdown: still tell the thread to exit.
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_loop(shared: &Shared, stop_rx: &xch::Receiver<()>, cancelled: &AtomicBool) {
    let cfg = &shared.loop_cfg;
    tracing::debug!(tick = ?cfg.tick, backoff = ?cfg.error_backoff, "control loop running");
    loop {
        let wait = match catch_unwind(AssertUnwindSafe(|| shared.tick(Some(cancelled)))) {
            Ok(Ok(report)) => {
                tracing::debug!(
                    measurement = report.measurement,
                    paused = report.paused,
                    doses = report.doses(),
                    failures = report.actuation_failures,
                    "tick"
                );
                cfg.tick
            }
            Ok(Err(ControlError::SensorUnavailable(msg))) => {
                tracing::warn!(error = %msg, "sensor unavailable; tick skipped");
                cfg.tick
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "tick failed; backing off");
                cfg.error_backoff
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                lock(&shared.core).state.last_tick_error = Some(format!("tick panicked: {msg}"));
                tracing::error!(panic = %msg, "tick panicked; backing off");
                cfg.error_backoff
            }
        };
        match stop_rx.recv_timeout(wait) {
            Err(xch::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("control loop exited");
}
