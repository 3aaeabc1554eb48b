use std::time::Duration;

use dosectl_core::mocks::{RecordingPump, ScriptedSensor};
use dosectl_core::{BuildError, ControlError, Controller, ControllerConfig, LoopCfg, Mode};
use rstest::rstest;

#[rstest]
fn builder_missing_sensor_yields_typed_build_error() {
    let err = Controller::builder()
        .with_pump(RecordingPump::new())
        .try_build()
        .expect_err("should fail with MissingSensor");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingSensor) => {}
        other => panic!("expected MissingSensor, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_pump_yields_typed_build_error() {
    let err = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.2))
        .try_build()
        .expect_err("should fail with MissingPump");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingPump)
    ));
}

#[rstest]
#[case(ControllerConfig { target_value: 0.30, ..ControllerConfig::default() })]
#[case(ControllerConfig { min_flow_rate: 200.0, ..ControllerConfig::default() })]
#[case(ControllerConfig { dose_duration_s: 0.0, ..ControllerConfig::default() })]
#[case(ControllerConfig { default_flow_rate: 10.0, ..ControllerConfig::default() })]
fn builder_rejects_invalid_config(#[case] cfg: ControllerConfig) {
    let err = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.2))
        .with_pump(RecordingPump::new())
        .with_config(cfg)
        .build()
        .expect_err("invalid config");
    assert!(matches!(
        err.downcast_ref::<ControlError>(),
        Some(ControlError::Validation(_))
    ));
}

#[rstest]
fn builder_rejects_backoff_not_longer_than_tick() {
    let err = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.2))
        .with_pump(RecordingPump::new())
        .with_loop(LoopCfg {
            tick: Duration::from_secs(2),
            error_backoff: Duration::from_secs(1),
            ..LoopCfg::default()
        })
        .build()
        .expect_err("invalid loop");
    assert!(err.to_string().contains("error_backoff"));
}

#[rstest]
fn built_controller_starts_disabled_and_idle() {
    let ctrl = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.2))
        .with_pump(RecordingPump::new())
        .build()
        .unwrap();
    let st = ctrl.status();
    assert_eq!(st.mode, Mode::Disabled);
    assert!(!st.running && !st.paused && !st.pump_running);
    assert_eq!(st.dose_counter, 0);
    assert_eq!(st.current_measurement, None);
}
