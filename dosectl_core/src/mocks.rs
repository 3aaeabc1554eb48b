//! Scriptable test doubles for `dosectl_core`.
//!
//! Every double is `Clone` and clones share state, so a test can hand one
//! handle to the controller and keep another to script and inspect it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dosectl_traits::{HwBoxError, Pump, Sensor};

use crate::audit::{AuditSink, SinkError};
use crate::history::DoseRecord;
use crate::util::lock;

#[derive(Debug, Default)]
struct SensorScript {
    value: f64,
    queued: VecDeque<f64>,
    failing: u32,
    panicking: u32,
    stall: Option<Duration>,
    reads: u64,
    samples: VecDeque<f64>,
}

/// Sensor returning a settable value, with queued values and injected faults.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    inner: Arc<Mutex<SensorScript>>,
}

impl ScriptedSensor {
    const WINDOW: usize = 10;

    pub fn new(value: f64) -> Self {
        let s = Self::default();
        s.set(value);
        s
    }

    /// Value returned once the queue is empty.
    pub fn set(&self, value: f64) {
        lock(&self.inner).value = value;
    }

    /// Values returned, in order, before falling back to `set`.
    pub fn push(&self, values: impl IntoIterator<Item = f64>) {
        lock(&self.inner).queued.extend(values);
    }

    /// Fail the next `n` reads.
    pub fn fail_next(&self, n: u32) {
        lock(&self.inner).failing = n;
    }

    /// Panic inside the next `n` reads.
    pub fn panic_next(&self, n: u32) {
        lock(&self.inner).panicking = n;
    }

    /// Block the next read for `d` before answering.
    pub fn stall_next(&self, d: Duration) {
        lock(&self.inner).stall = Some(d);
    }

    /// Number of read attempts, failed ones included.
    pub fn reads(&self) -> u64 {
        lock(&self.inner).reads
    }
}

impl Sensor for ScriptedSensor {
    fn get_reading(&mut self) -> Result<f64, HwBoxError> {
        let mut s = lock(&self.inner);
        s.reads += 1;
        if let Some(d) = s.stall.take() {
            drop(s);
            std::thread::sleep(d);
            s = lock(&self.inner);
        }
        if s.panicking > 0 {
            s.panicking -= 1;
            drop(s);
            panic!("scripted sensor panic");
        }
        if s.failing > 0 {
            s.failing -= 1;
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted sensor timeout",
            )));
        }
        let v = s.queued.pop_front().unwrap_or(s.value);
        s.samples.push_back(v);
        while s.samples.len() > Self::WINDOW {
            s.samples.pop_front();
        }
        Ok(v)
    }

    fn moving_average(&self) -> Option<f64> {
        let s = lock(&self.inner);
        if s.samples.is_empty() {
            None
        } else {
            Some(s.samples.iter().sum::<f64>() / s.samples.len() as f64)
        }
    }
}

/// Calls observed by a `RecordingPump`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpEvent {
    SetFlowRate(f64),
    Start { duration: Duration, flow_rate: f64 },
    Stop,
}

#[derive(Debug, Default)]
struct PumpLog {
    events: Vec<PumpEvent>,
    flow_rate: f64,
    running: bool,
    failing_starts: u32,
    failing_stops: bool,
}

/// Pump that records every call. It has no timer: it runs until stopped.
#[derive(Debug, Clone, Default)]
pub struct RecordingPump {
    inner: Arc<Mutex<PumpLog>>,
}

impl RecordingPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PumpEvent> {
        lock(&self.inner).events.clone()
    }

    /// `(duration, flow_rate)` of every successful start.
    pub fn starts(&self) -> Vec<(Duration, f64)> {
        lock(&self.inner)
            .events
            .iter()
            .filter_map(|e| match e {
                PumpEvent::Start {
                    duration,
                    flow_rate,
                } => Some((*duration, *flow_rate)),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.inner)
            .events
            .iter()
            .filter(|e| matches!(e, PumpEvent::Stop))
            .count()
    }

    /// Fail the next `n` starts.
    pub fn fail_next_starts(&self, n: u32) {
        lock(&self.inner).failing_starts = n;
    }

    /// Make every stop fail until reset.
    pub fn fail_stops(&self, fail: bool) {
        lock(&self.inner).failing_stops = fail;
    }
}

impl Pump for RecordingPump {
    fn start(&mut self, duration: Duration) -> Result<(), HwBoxError> {
        let mut p = lock(&self.inner);
        if p.failing_starts > 0 {
            p.failing_starts -= 1;
            return Err(Box::new(std::io::Error::other("scripted pump start failure")));
        }
        let flow_rate = p.flow_rate;
        p.events.push(PumpEvent::Start {
            duration,
            flow_rate,
        });
        p.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HwBoxError> {
        let mut p = lock(&self.inner);
        if p.failing_stops {
            return Err(Box::new(std::io::Error::other("scripted pump stop failure")));
        }
        p.events.push(PumpEvent::Stop);
        p.running = false;
        Ok(())
    }

    fn set_flow_rate(&mut self, rate: f64) -> Result<(), HwBoxError> {
        let mut p = lock(&self.inner);
        p.events.push(PumpEvent::SetFlowRate(rate));
        p.flow_rate = rate;
        Ok(())
    }

    fn is_running(&self) -> bool {
        lock(&self.inner).running
    }

    fn flow_rate(&self) -> f64 {
        lock(&self.inner).flow_rate
    }
}

/// Audit sink that always fails (or panics) and counts calls.
#[derive(Debug, Clone, Default)]
pub struct FailingSink {
    calls: Arc<AtomicUsize>,
    panic: bool,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl AuditSink for FailingSink {
    fn record(&self, _dose: &DoseRecord) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.panic {
            panic!("audit sink panic");
        }
        Err("audit backend offline".into())
    }
}
