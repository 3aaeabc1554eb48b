//! Simulated dosing hardware.
//!
//! A `SimulatedBasin` models one body of water. `SimulatedSensor` and
//! `SimulatedPump` are handles onto the same basin, so dosing through the pump
//! lowers what the sensor reports. Each instance is created explicitly and
//! injected into the controller; there is no process-wide simulator state.
pub mod error;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dosectl_traits::{Clock, HwBoxError, Pump, Sensor};

pub use error::HwError;

/// Physical parameters of the simulated basin.
#[derive(Debug, Clone)]
pub struct BasinParams {
    /// Turbidity at t=0 (NTU).
    pub initial_turbidity: f64,
    /// Turbidity gained per second with no dosing (NTU/s).
    pub drift_per_s: f64,
    /// Turbidity removed per ml of coagulant (NTU/ml).
    pub removal_per_ml: f64,
    /// Turbidity never drops below this floor.
    pub floor: f64,
    /// Pump hardware range (ml/h).
    pub min_flow_rate: f64,
    pub max_flow_rate: f64,
    /// Sensor moving-average window (samples).
    pub average_window: usize,
}

impl Default for BasinParams {
    fn default() -> Self {
        Self {
            initial_turbidity: 0.30,
            drift_per_s: 0.0001,
            removal_per_ml: 0.05,
            floor: 0.05,
            min_flow_rate: 60.0,
            max_flow_rate: 150.0,
            average_window: 10,
        }
    }
}

#[derive(Debug)]
struct BasinState {
    params: BasinParams,
    turbidity: f64,
    updated_at: f64,
    flow_rate: f64,
    run_started: f64,
    run_until: f64,
    samples: VecDeque<f64>,
    failing_reads: u32,
    failing_starts: u32,
    total_dosed_ml: f64,
}

impl BasinState {
    /// Integrate drift and dosing from `updated_at` up to `now`.
    fn advance(&mut self, now: f64) {
        let dt = now - self.updated_at;
        if dt <= 0.0 {
            return;
        }
        let from = self.updated_at.max(self.run_started);
        let to = now.min(self.run_until);
        let pumped_s = (to - from).max(0.0);
        let dosed_ml = self.flow_rate * pumped_s / 3600.0;
        self.total_dosed_ml += dosed_ml;
        self.turbidity = (self.turbidity + self.params.drift_per_s * dt
            - self.params.removal_per_ml * dosed_ml)
            .max(self.params.floor);
        self.updated_at = now;
    }
}

/// Shared basin model; hand out sensor and pump handles with `sensor()`/`pump()`.
#[derive(Clone)]
pub struct SimulatedBasin {
    state: Arc<Mutex<BasinState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatedBasin {
    pub fn new(params: BasinParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        let state = BasinState {
            turbidity: params.initial_turbidity,
            flow_rate: params.min_flow_rate,
            params,
            updated_at: now,
            run_started: now,
            run_until: now,
            samples: VecDeque::new(),
            failing_reads: 0,
            failing_starts: 0,
            total_dosed_ml: 0.0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BasinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sensor(&self) -> SimulatedSensor {
        SimulatedSensor {
            basin: self.clone(),
        }
    }

    pub fn pump(&self) -> SimulatedPump {
        SimulatedPump {
            basin: self.clone(),
        }
    }

    /// Current modelled turbidity, without recording a sample.
    pub fn turbidity(&self) -> f64 {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance(now);
        st.turbidity
    }

    /// Force the modelled turbidity (e.g. a storm-water disturbance).
    pub fn set_turbidity(&self, value: f64) {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance(now);
        st.turbidity = value.max(st.params.floor);
    }

    /// Make the next `n` sensor reads fail with a timeout.
    pub fn fail_next_reads(&self, n: u32) {
        self.lock().failing_reads = n;
    }

    /// Make the next `n` pump starts fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.lock().failing_starts = n;
    }

    /// Total coagulant volume delivered so far (ml).
    pub fn total_dosed_ml(&self) -> f64 {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance(now);
        st.total_dosed_ml
    }
}

/// Turbidity probe reading the shared basin.
pub struct SimulatedSensor {
    basin: SimulatedBasin,
}

impl Sensor for SimulatedSensor {
    fn get_reading(&mut self) -> Result<f64, HwBoxError> {
        let now = self.basin.clock.now();
        let mut st = self.basin.lock();
        if st.failing_reads > 0 {
            st.failing_reads -= 1;
            tracing::debug!(remaining = st.failing_reads, "simulated sensor timeout");
            return Err(Box::new(HwError::Timeout));
        }
        st.advance(now);
        let value = st.turbidity;
        let window = st.params.average_window.max(1);
        st.samples.push_back(value);
        while st.samples.len() > window {
            st.samples.pop_front();
        }
        tracing::trace!(turbidity = value, "simulated sensor sample");
        Ok(value)
    }

    fn moving_average(&self) -> Option<f64> {
        let st = self.basin.lock();
        if st.samples.is_empty() {
            return None;
        }
        Some(st.samples.iter().sum::<f64>() / st.samples.len() as f64)
    }
}

/// Dosing pump driving the shared basin. Stops itself when the run expires.
pub struct SimulatedPump {
    basin: SimulatedBasin,
}

impl Pump for SimulatedPump {
    fn start(&mut self, duration: Duration) -> Result<(), HwBoxError> {
        let now = self.basin.clock.now();
        let mut st = self.basin.lock();
        if st.failing_starts > 0 {
            st.failing_starts -= 1;
            return Err(Box::new(HwError::PumpFault("motor did not spin up".into())));
        }
        st.advance(now);
        st.run_started = now;
        st.run_until = now + duration.as_secs_f64();
        tracing::debug!(
            duration_s = duration.as_secs_f64(),
            flow_rate = st.flow_rate,
            "simulated pump start"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HwBoxError> {
        let now = self.basin.clock.now();
        let mut st = self.basin.lock();
        st.advance(now);
        if st.run_until > now {
            st.run_until = now;
            tracing::debug!("simulated pump stopped early");
        }
        Ok(())
    }

    fn set_flow_rate(&mut self, rate: f64) -> Result<(), HwBoxError> {
        let now = self.basin.clock.now();
        let mut st = self.basin.lock();
        let (lo, hi) = (st.params.min_flow_rate, st.params.max_flow_rate);
        if !rate.is_finite() || rate < lo || rate > hi {
            return Err(Box::new(HwError::InvalidFlowRate(rate)));
        }
        // Account for the old rate up to now before switching.
        st.advance(now);
        st.flow_rate = rate;
        Ok(())
    }

    fn is_running(&self) -> bool {
        let now = self.basin.clock.now();
        now < self.basin.lock().run_until
    }

    fn flow_rate(&self) -> f64 {
        self.basin.lock().flow_rate
    }
}
