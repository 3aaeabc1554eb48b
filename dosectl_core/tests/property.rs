use std::sync::Arc;

use dosectl_core::mocks::{RecordingPump, ScriptedSensor};
use dosectl_core::{
    Controller, ControllerConfig, ControllerState, DoseKind, DoseScheduler, Mode, PidEngine,
    PidGains, should_auto_dose,
};
use dosectl_traits::ManualClock;
use proptest::prelude::*;

prop_compose! {
    fn band()(low in 0.0f64..5.0, width in 0.01f64..5.0, t in 0.05f64..0.95) -> (f64, f64, f64) {
        let high = low + width;
        (low, low + width * t, high)
    }
}

proptest! {
    #[test]
    fn automatic_doses_respect_min_interval(
        steps in prop::collection::vec((0.0f64..200.0, 0.0f64..0.6), 1..60),
        interval in 1.0f64..400.0,
    ) {
        let sensor = ScriptedSensor::new(0.3);
        let clock = ManualClock::new();
        let cfg = ControllerConfig { min_dose_interval_s: interval, ..ControllerConfig::default() };
        let ctrl = Controller::builder()
            .with_sensor(sensor.clone())
            .with_pump(RecordingPump::new())
            .with_config(cfg)
            .with_clock(Arc::new(clock.clone()))
            .with_initial_mode(Mode::Automatic)
            .build()
            .unwrap();
        let mut t = 0.0;
        for (dt, m) in steps {
            t += dt;
            clock.set(t);
            sensor.set(m);
            ctrl.tick().unwrap();
        }
        let ts: Vec<f64> = ctrl
            .history()
            .iter()
            .filter(|r| r.kind == DoseKind::Automatic)
            .map(|r| r.timestamp)
            .collect();
        for pair in ts.windows(2) {
            prop_assert!(pair[1] - pair[0] >= interval, "{:?}", pair);
        }
    }

    #[test]
    fn no_auto_dose_at_or_below_high(
        (low, target, high) in band(),
        frac in 0.0f64..=1.0,
        now in 0.0f64..1e6,
    ) {
        let cfg = ControllerConfig {
            low_threshold: low,
            target_value: target,
            high_threshold: high,
            ..ControllerConfig::default()
        };
        let state = ControllerState { mode: Mode::Automatic, ..ControllerState::default() };
        let measurement = high * frac;
        prop_assert!(!should_auto_dose(&cfg, &state, measurement, now));
        prop_assert!(should_auto_dose(&cfg, &state, high + 0.001, now));
    }

    #[test]
    fn pid_flow_stays_in_bounds(
        kp in 0.0f64..1e6,
        ki in 0.0f64..1e6,
        kd in 0.0f64..1e6,
        readings in prop::collection::vec((-1e9f64..1e9, 0.0f64..10.0), 1..40),
        min_flow in 0.0f64..100.0,
        span in 0.0f64..500.0,
    ) {
        let max_flow = min_flow + span;
        let mut pid = PidEngine::new(PidGains { kp, ki, kd, ..PidGains::default() });
        let mut now = 0.0;
        for (m, dt) in readings {
            now += dt;
            let flow = pid.compute(0.15, m, now, min_flow, max_flow);
            prop_assert!(flow >= min_flow && flow <= max_flow, "{flow} not in [{min_flow}, {max_flow}]");
        }
    }

    #[test]
    fn check_due_is_idempotent(
        dues in prop::collection::vec(-100.0f64..100.0, 0..30),
        now in -100.0f64..100.0,
    ) {
        let cfg = ControllerConfig::default();
        let mut s = DoseScheduler::new();
        for d in &dues {
            s.schedule(*d, 10.0, None, &cfg).unwrap();
        }
        let first = s.check_due(now);
        let second = s.check_due(now);
        prop_assert!(second.is_empty());
        let expected = dues.iter().filter(|d| **d <= now).count();
        prop_assert_eq!(first.len(), expected);
        prop_assert!(first.windows(2).all(|w| w[0].due_timestamp <= w[1].due_timestamp));
    }

    #[test]
    fn integral_is_clamped_under_sustained_error(
        error in 1.0f64..1e6,
        ticks in 60usize..500,
        limit in 0.1f64..50.0,
    ) {
        let mut pid = PidEngine::new(PidGains { integral_limit: limit, ..PidGains::default() });
        pid.reset(0.0);
        for i in 1..=ticks {
            pid.update(0.0, error, i as f64);
            prop_assert!(pid.integral().abs() <= limit);
        }
        prop_assert!((pid.integral() - limit).abs() < 1e-9);
    }
}
