//! PID engine mapping turbidity excess to a pump flow rate.
//!
//! error = measurement - setpoint, so a positive error means "too cloudy".
//! The plant can only lower the measurement, so a non-positive error always
//! maps to the minimum flow rate.

use crate::config::PidGains;
use crate::util::clamp_f64;

/// PID accumulator state plus gains. Pure: no I/O, time is passed in.
#[derive(Debug, Clone)]
pub struct PidEngine {
    gains: PidGains,
    integral: f64,
    last_error: f64,
    last_timestamp: Option<f64>,
}

impl PidEngine {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_error: 0.0,
            last_timestamp: None,
        }
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// Swap gains without touching the accumulators.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Zero the accumulators and restart the time base at `now`.
    pub fn reset(&mut self, now: f64) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_timestamp = Some(now);
    }

    /// Advance the controller and return the unbounded P + I + D sum.
    ///
    /// The first update after construction has no time base, so it contributes
    /// neither integral nor derivative. A clock that stepped backwards counts
    /// as zero elapsed time.
    pub fn update(&mut self, setpoint: f64, measurement: f64, now: f64) -> f64 {
        let error = measurement - setpoint;
        let limit = self.gains.integral_limit.abs();
        let min_dt = if self.gains.min_dt_s > 0.0 {
            self.gains.min_dt_s
        } else {
            0.001
        };

        let p = self.gains.kp * error;

        let (i, d) = match self.last_timestamp {
            Some(last) => {
                let dt = (now - last).max(0.0);
                self.integral = clamp_f64(self.integral + error * dt, -limit, limit);
                let derivative = (error - self.last_error) / dt.max(min_dt);
                (self.gains.ki * self.integral, self.gains.kd * derivative)
            }
            None => (self.gains.ki * self.integral, 0.0),
        };

        self.last_error = error;
        self.last_timestamp = Some(now);
        p + i + d
    }

    /// Compute a flow rate in `[min_flow, max_flow]` for the given reading.
    pub fn compute(
        &mut self,
        setpoint: f64,
        measurement: f64,
        now: f64,
        min_flow: f64,
        max_flow: f64,
    ) -> f64 {
        let raw = self.update(setpoint, measurement, now);
        let error = measurement - setpoint;
        if error.is_nan() || error <= 0.0 || !raw.is_finite() {
            return min_flow;
        }
        let fraction = (raw.abs() / self.gains.output_span).min(1.0);
        clamp_f64(min_flow + fraction * (max_flow - min_flow), min_flow, max_flow)
    }
}
