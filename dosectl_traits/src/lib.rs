//! Hardware capability contracts consumed by the dosing controller.
//!
//! Sensor and pump drivers live outside the core; the controller only sees
//! these traits. Fallible calls return a boxed error so drivers can surface
//! their own error types; `dosectl_core` maps them to typed errors.
pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// Boxed error type crossing the hardware boundary.
pub type HwBoxError = Box<dyn std::error::Error + Send + Sync>;

/// A process-variable sensor (turbidity in NTU, or any scalar).
pub trait Sensor {
    /// Take a fresh reading. Failing here means "no value this tick".
    fn get_reading(&mut self) -> Result<f64, HwBoxError>;

    /// Smoothed value over the sensor's own window, if it keeps one.
    fn moving_average(&self) -> Option<f64>;
}

/// A variable-flow dosing pump with its own duration-based auto-stop.
pub trait Pump {
    /// Run for `duration`, then stop on its own.
    fn start(&mut self, duration: std::time::Duration) -> Result<(), HwBoxError>;
    fn stop(&mut self) -> Result<(), HwBoxError>;
    /// Set the flow rate (ml/h) used by the next and any in-flight run.
    fn set_flow_rate(&mut self, rate: f64) -> Result<(), HwBoxError>;
    fn is_running(&self) -> bool;
    fn flow_rate(&self) -> f64;
}

impl<T: Sensor + ?Sized> Sensor for Box<T> {
    fn get_reading(&mut self) -> Result<f64, HwBoxError> {
        (**self).get_reading()
    }

    fn moving_average(&self) -> Option<f64> {
        (**self).moving_average()
    }
}

impl<T: Pump + ?Sized> Pump for Box<T> {
    fn start(&mut self, duration: std::time::Duration) -> Result<(), HwBoxError> {
        (**self).start(duration)
    }

    fn stop(&mut self) -> Result<(), HwBoxError> {
        (**self).stop()
    }

    fn set_flow_rate(&mut self, rate: f64) -> Result<(), HwBoxError> {
        (**self).set_flow_rate(rate)
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn flow_rate(&self) -> f64 {
        (**self).flow_rate()
    }
}
