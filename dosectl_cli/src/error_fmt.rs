//! Human-readable error descriptions and structured JSON error formatting.

use dosectl_core::{BuildError, ControlError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => {
                "What happened: No sensor was provided to the controller.\nLikely causes: The turbidity sensor failed to initialize or was not wired into the builder.\nHow to fix: Ensure the sensor is created successfully and passed via with_sensor(...).".to_string()
            }
            BuildError::MissingPump => {
                "What happened: No pump was provided to the controller.\nLikely causes: The dosing pump failed to initialize or was not wired into the builder.\nHow to fix: Ensure the pump is created successfully and passed via with_pump(...).".to_string()
            }
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::InvalidMode { required, current } => format!(
                "What happened: The operation needs {required} mode but the controller is in {current} mode.\nLikely causes: A manual dose was requested without --mode manual.\nHow to fix: Rerun with `--mode {required}`."
            ),
            ControlError::SensorUnavailable(msg) => format!(
                "What happened: The turbidity sensor could not be read ({msg}).\nLikely causes: Sensor offline, cable fault or a reading that is not a number.\nHow to fix: Check the sensor connection, then rerun `dosectl self-check`."
            ),
            ControlError::Actuation(msg) => format!(
                "What happened: The dosing pump did not accept the command ({msg}).\nLikely causes: Pump offline or the requested flow rate is outside the pump's range.\nHow to fix: Check the pump and the controller.min_flow_rate/max_flow_rate settings."
            ),
            ControlError::Validation(msg) => format!(
                "What happened: Input was rejected ({msg}).\nLikely causes: Out-of-range duration, flow rate or threshold.\nHow to fix: Correct the value and try again; `dosectl check-config` prints the effective limits."
            ),
            ControlError::AlreadyRunning | ControlError::NotRunning => format!(
                "What happened: {ce}.\nLikely causes: start/stop issued twice.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid ({}).\nLikely causes: Out-of-range or inconsistent values in the TOML.\nHow to fix: Edit the config file and run `dosectl check-config`.",
            err.root_cause()
        );
    }

    // Schedule CSV header special-case
    if lower.contains("schedule csv must have headers") {
        return "Invalid headers in schedule CSV. Expected 'offset_s,duration_s,flow_rate'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> u8 {
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::InvalidMode { .. }) => 3,
        Some(ControlError::SensorUnavailable(_)) => 4,
        Some(ControlError::Actuation(_)) => 5,
        Some(ControlError::Validation(_)) => 6,
        Some(ControlError::AlreadyRunning | ControlError::NotRunning) => 7,
        None => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "BuildError";
    }
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::InvalidMode { .. }) => "InvalidMode",
        Some(ControlError::SensorUnavailable(_)) => "SensorUnavailable",
        Some(ControlError::Actuation(_)) => "Actuation",
        Some(ControlError::Validation(_)) => "Validation",
        Some(ControlError::AlreadyRunning) => "AlreadyRunning",
        Some(ControlError::NotRunning) => "NotRunning",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dosectl_core::Mode;

    #[test]
    fn invalid_mode_maps_to_code_and_reason() {
        let err = eyre::Report::new(ControlError::InvalidMode {
            required: Mode::Manual,
            current: Mode::Automatic,
        });
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "InvalidMode");
        assert!(v["message"].as_str().unwrap().contains("--mode manual"));
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }

    #[test]
    fn config_errors_name_the_root_cause() {
        let err = eyre::eyre!("pid.kp must be a finite value >= 0").wrap_err("invalid configuration");
        let text = humanize(&err);
        assert!(text.contains("pid.kp"), "{text}");
    }
}
