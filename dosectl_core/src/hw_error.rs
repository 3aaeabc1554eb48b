//! Maps `Box<dyn Error>` from the hardware traits to typed `ControlError`.
//!
//! With the `hardware-errors` feature, `dosectl_hardware::HwError` is
//! downcast for precise mapping; otherwise the message is carried through.

use crate::error::ControlError;

type Dyn = dyn std::error::Error + 'static;

/// Any sensor failure makes the reading unavailable for this tick.
pub fn map_sensor_error(e: &Dyn) -> ControlError {
    ControlError::SensorUnavailable(e.to_string())
}

/// Pump failures are actuation errors, except a rejected flow rate which the
/// caller could have avoided.
pub fn map_pump_error(e: &Dyn) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<dosectl_hardware::HwError>() {
            return match hw {
                dosectl_hardware::HwError::InvalidFlowRate(_) => {
                    ControlError::Validation(hw.to_string())
                }
                other => ControlError::Actuation(other.to_string()),
            };
        }
    }
    ControlError::Actuation(e.to_string())
}
