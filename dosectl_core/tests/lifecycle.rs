//! Mode transitions, start/stop errors and the background loop thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dosectl_core::mocks::{FailingSink, PumpEvent, RecordingPump, ScriptedSensor};
use dosectl_core::{
    ChannelSink, ControlError, Controller, ControllerConfig, FlowCurve, LoopCfg, Mode, Report,
};
use dosectl_traits::{ManualClock, SystemClock};
use rstest::rstest;

fn fast_loop() -> LoopCfg {
    LoopCfg {
        tick: Duration::from_millis(10),
        error_backoff: Duration::from_millis(30),
        stop_timeout: Duration::from_secs(2),
        history_capacity: 100,
    }
}

fn control_error(err: &Report) -> Option<&ControlError> {
    err.downcast_ref::<ControlError>()
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn manual_rig(value: f64) -> (Controller, ScriptedSensor, RecordingPump) {
    let sensor = ScriptedSensor::new(value);
    let pump = RecordingPump::new();
    let ctrl = Controller::builder()
        .with_sensor(sensor.clone())
        .with_pump(pump.clone())
        .with_clock(Arc::new(ManualClock::new()))
        .with_loop(fast_loop())
        .build()
        .unwrap();
    (ctrl, sensor, pump)
}

#[test]
fn start_twice_and_stop_twice_are_lifecycle_errors() {
    let (ctrl, _sensor, _pump) = manual_rig(0.2);
    ctrl.start(Mode::Manual).unwrap();
    assert!(ctrl.is_running());

    let err = ctrl.start(Mode::Automatic).unwrap_err();
    assert_eq!(control_error(&err), Some(&ControlError::AlreadyRunning));
    assert_eq!(ctrl.mode(), Mode::Manual);

    ctrl.stop().unwrap();
    assert!(!ctrl.is_running());
    let err = ctrl.stop().unwrap_err();
    assert_eq!(control_error(&err), Some(&ControlError::NotRunning));
}

#[test]
fn stop_always_commands_pump_stop() {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    ctrl.start(Mode::Manual).unwrap();
    ctrl.manual_dose(600.0, Some(100.0)).unwrap();
    let before = pump.stop_count();
    ctrl.stop().unwrap();
    assert_eq!(pump.stop_count(), before + 1);
    assert_eq!(pump.events().last(), Some(&PumpEvent::Stop));
}

#[test]
fn stop_reports_pump_failure_after_cleanup() {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    ctrl.start(Mode::Disabled).unwrap();
    pump.fail_stops(true);
    let err = ctrl.stop().unwrap_err();
    assert!(matches!(control_error(&err), Some(ControlError::Actuation(_))));
    assert!(!ctrl.is_running());
}

#[rstest]
#[case(Mode::Disabled, Mode::Manual)]
#[case(Mode::Manual, Mode::Automatic)]
#[case(Mode::Automatic, Mode::Disabled)]
#[case(Mode::Manual, Mode::Manual)]
fn every_mode_change_stops_the_pump(#[case] from: Mode, #[case] to: Mode) {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    ctrl.set_mode(from).unwrap();
    let before = pump.stop_count();
    ctrl.set_mode(to).unwrap();
    assert_eq!(pump.stop_count(), before + 1);
    assert_eq!(ctrl.mode(), to);
}

#[rstest]
#[case(Mode::Disabled)]
#[case(Mode::Automatic)]
fn manual_dose_outside_manual_mode_is_rejected(#[case] mode: Mode) {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    ctrl.set_mode(mode).unwrap();
    let err = ctrl.manual_dose(10.0, None).unwrap_err();
    assert_eq!(
        control_error(&err),
        Some(&ControlError::InvalidMode {
            required: Mode::Manual,
            current: mode
        })
    );
    assert!(pump.starts().is_empty());
}

#[rstest]
#[case(0.0, None)]
#[case(-1.0, None)]
#[case(f64::NAN, None)]
#[case(10.0, Some(10.0))]
#[case(10.0, Some(151.0))]
#[case(1e20, Some(100.0))]
#[case(f64::MAX, None)]
fn manual_dose_rejects_bad_input(#[case] duration: f64, #[case] flow: Option<f64>) {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    ctrl.set_mode(Mode::Manual).unwrap();
    let err = ctrl.manual_dose(duration, flow).unwrap_err();
    assert!(matches!(control_error(&err), Some(ControlError::Validation(_))));
    assert!(pump.starts().is_empty());
}

#[test]
fn entering_automatic_resets_pid_but_staying_does_not() {
    let (ctrl, _sensor, _pump) = manual_rig(0.30);
    ctrl.set_mode(Mode::Automatic).unwrap();
    ctrl.tick().unwrap();
    let st = ctrl.state();
    assert!(st.pid_last_error > 0.0);

    ctrl.set_mode(Mode::Automatic).unwrap();
    assert_eq!(ctrl.state().pid_last_error, st.pid_last_error);

    // A manual override keeps the accumulators for the way back.
    ctrl.set_mode(Mode::Manual).unwrap();
    ctrl.set_mode(Mode::Automatic).unwrap();
    let kept = ctrl.state();
    assert_eq!(kept.pid_last_error, st.pid_last_error);
    assert_eq!(kept.pid_integral, st.pid_integral);
    assert_eq!(kept.pid_last_timestamp, st.pid_last_timestamp);

    ctrl.set_mode(Mode::Disabled).unwrap();
    ctrl.set_mode(Mode::Automatic).unwrap();
    assert_eq!(ctrl.state().pid_last_error, 0.0);
    assert_eq!(ctrl.state().pid_integral, 0.0);
}

#[test]
fn thresholds_update_and_clamp_target() {
    let (ctrl, _sensor, _pump) = manual_rig(0.2);
    let t = ctrl.set_thresholds(Some(0.14), None, None).unwrap();
    assert!(t.low < t.target && t.target < t.high);
    assert_eq!(ctrl.status().thresholds, t);

    let err = ctrl.set_thresholds(Some(0.1), Some(0.2), None).unwrap_err();
    assert!(matches!(control_error(&err), Some(ControlError::Validation(_))));
    assert_eq!(ctrl.status().thresholds, t);
}

#[test]
fn update_config_swaps_flow_curve() {
    let (ctrl, _sensor, _pump) = manual_rig(0.2);
    let mut cfg = ctrl.config();
    cfg.flow_curve = FlowCurve::Linear;
    ctrl.update_config(cfg).unwrap();
    assert_eq!(ctrl.status().flow_curve, FlowCurve::Linear);

    let bad = ControllerConfig {
        min_flow_rate: 200.0,
        ..ControllerConfig::default()
    };
    assert!(ctrl.update_config(bad).is_err());
    assert_eq!(ctrl.config().flow_curve, FlowCurve::Linear);
}

#[test]
fn cancelled_schedule_never_runs() {
    let (ctrl, _sensor, pump) = manual_rig(0.2);
    let e = ctrl.schedule(0.0, 5.0, None).unwrap();
    assert!(ctrl.cancel_scheduled(e.id));
    ctrl.tick().unwrap();
    assert!(pump.starts().is_empty());
    assert_eq!(ctrl.status().pending_scheduled, 0);
}

#[test]
fn failing_audit_sink_does_not_block_dosing() {
    for sink in [FailingSink::new(), FailingSink::panicking()] {
        let ctrl = Controller::builder()
            .with_sensor(ScriptedSensor::new(0.2))
            .with_pump(RecordingPump::new())
            .with_clock(Arc::new(ManualClock::new()))
            .with_audit(sink.clone())
            .with_initial_mode(Mode::Manual)
            .build()
            .unwrap();
        ctrl.manual_dose(5.0, None).unwrap();
        assert_eq!(sink.calls(), 1);
        assert_eq!(ctrl.state().dose_counter, 1);
    }
}

#[test]
fn channel_sink_receives_every_dose() {
    let (sink, rx) = ChannelSink::bounded(8);
    let ctrl = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.2))
        .with_pump(RecordingPump::new())
        .with_clock(Arc::new(ManualClock::new()))
        .with_audit(sink)
        .with_initial_mode(Mode::Manual)
        .build()
        .unwrap();
    ctrl.manual_dose(5.0, Some(90.0)).unwrap();
    let rec = rx.try_recv().unwrap();
    assert_eq!(rec.flow_rate, 90.0);
}

#[test]
fn background_loop_survives_sensor_outage() {
    let sensor = ScriptedSensor::new(0.2);
    let ctrl = Controller::builder()
        .with_sensor(sensor.clone())
        .with_pump(RecordingPump::new())
        .with_clock(Arc::new(SystemClock::new()))
        .with_loop(fast_loop())
        .build()
        .unwrap();
    sensor.fail_next(3);
    ctrl.start(Mode::Disabled).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || ctrl.status().current_measurement.is_some()),
        "loop never recovered"
    );
    assert!(sensor.reads() >= 4);
    assert!(ctrl.status().last_tick_error.is_none());
    ctrl.stop().unwrap();
}

#[test]
fn background_loop_survives_panicking_tick() {
    let sensor = ScriptedSensor::new(0.2);
    let ctrl = Controller::builder()
        .with_sensor(sensor.clone())
        .with_pump(RecordingPump::new())
        .with_clock(Arc::new(SystemClock::new()))
        .with_loop(fast_loop())
        .build()
        .unwrap();
    sensor.panic_next(1);
    ctrl.start(Mode::Disabled).unwrap();

    assert!(wait_until(Duration::from_secs(5), || sensor.reads() >= 3));
    assert!(ctrl.is_running());
    ctrl.stop().unwrap();
}

#[test]
fn background_loop_runs_automatic_doses() {
    let pump = RecordingPump::new();
    let ctrl = Controller::builder()
        .with_sensor(ScriptedSensor::new(0.30))
        .with_pump(pump.clone())
        .with_clock(Arc::new(SystemClock::new()))
        .with_loop(fast_loop())
        .build()
        .unwrap();
    ctrl.start(Mode::Automatic).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !pump.starts().is_empty()));
    // Ten-millisecond ticks against a 300 s cooldown: exactly one dose.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(pump.starts().len(), 1);
    ctrl.stop().unwrap();
}

#[test]
fn detached_tick_cannot_restart_pump_after_stop() {
    let sensor = ScriptedSensor::new(0.30);
    let pump = RecordingPump::new();
    let ctrl = Controller::builder()
        .with_sensor(sensor.clone())
        .with_pump(pump.clone())
        .with_clock(Arc::new(SystemClock::new()))
        .with_loop(LoopCfg {
            stop_timeout: Duration::from_millis(20),
            ..fast_loop()
        })
        .build()
        .unwrap();
    sensor.stall_next(Duration::from_millis(250));
    ctrl.start(Mode::Automatic).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sensor.reads() >= 1));

    // The loop is stuck in its first read, so stop() gives up and detaches it.
    ctrl.stop().unwrap();
    assert!(!ctrl.is_running());
    std::thread::sleep(Duration::from_millis(500));

    assert!(pump.starts().is_empty());
    assert_eq!(pump.events().last(), Some(&PumpEvent::Stop));
    assert_eq!(ctrl.status().dose_counter, 0);
}

#[test]
fn stop_returns_promptly_and_drop_cleans_up() {
    for _ in 0..10 {
        let (ctrl, _sensor, pump) = manual_rig(0.2);
        ctrl.start(Mode::Manual).unwrap();
        std::thread::sleep(Duration::from_millis(15));
        let t0 = Instant::now();
        ctrl.stop().unwrap();
        assert!(t0.elapsed() < Duration::from_secs(2));
        ctrl.start(Mode::Manual).unwrap();
        drop(ctrl);
        assert_eq!(pump.events().last(), Some(&PumpEvent::Stop));
    }
}
