//! Command implementations: simulator assembly, the run loop and checks.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dosectl_core::{Controller, ControllerConfig, ControllerStatus, LoopCfg, Mode, TracingSink};
use dosectl_hardware::{BasinParams, SimulatedBasin};
use dosectl_traits::{Clock, SystemClock};
use eyre::WrapErr;
use serde_json::json;

/// Test hook: make the simulated sensor fail its next N reads.
const FAIL_READS_ENV: &str = "DOSECTL_TEST_SIM_FAIL_READS";
/// Test hook: override the simulated starting turbidity.
const INITIAL_TURBIDITY_ENV: &str = "DOSECTL_TEST_SIM_TURBIDITY";

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn basin_params(cfg: &dosectl_config::Config) -> BasinParams {
    let sim = &cfg.simulation;
    BasinParams {
        initial_turbidity: env_parse(INITIAL_TURBIDITY_ENV).unwrap_or(sim.initial_turbidity),
        drift_per_s: sim.drift_per_s,
        removal_per_ml: sim.removal_per_ml,
        floor: sim.floor,
        min_flow_rate: cfg.controller.min_flow_rate,
        max_flow_rate: cfg.controller.max_flow_rate,
        average_window: sim.average_window,
    }
}

/// Build the simulated basin and a controller wired to it.
pub fn assemble(cfg: &dosectl_config::Config) -> eyre::Result<(SimulatedBasin, Controller)> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock::new());
    let basin = SimulatedBasin::new(basin_params(cfg), Arc::clone(&clock));
    if let Some(n) = env_parse::<u32>(FAIL_READS_ENV) {
        basin.fail_next_reads(n);
    }
    let ctrl = Controller::builder()
        .with_sensor(basin.sensor())
        .with_pump(basin.pump())
        .with_config(ControllerConfig::from(cfg))
        .with_loop(LoopCfg::from(&cfg.control_loop))
        .with_clock(clock)
        .with_audit(TracingSink)
        .build()?;
    Ok((basin, ctrl))
}

fn print_status(status: &ControllerStatus, elapsed: Duration, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            json!({ "event": "status", "elapsed_s": elapsed.as_secs_f64(), "status": status })
        );
    } else {
        let m = status
            .current_measurement
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        println!(
            "[{:>6.1}s] mode={} turbidity={} doses={} pump={} pending={}",
            elapsed.as_secs_f64(),
            status.mode,
            m,
            status.dose_counter,
            if status.pump_running { "on" } else { "off" },
            status.pending_scheduled,
        );
    }
}

pub struct RunArgs<'a> {
    pub mode: Mode,
    pub seconds: f64,
    pub schedule: Option<&'a Path>,
    pub manual_dose: Option<f64>,
    pub flow: Option<f64>,
    pub status_every: Duration,
}

pub fn run(
    cfg: &dosectl_config::Config,
    args: &RunArgs<'_>,
    shutdown: &Arc<AtomicBool>,
    json_mode: bool,
) -> eyre::Result<()> {
    let limit = match Duration::try_from_secs_f64(args.seconds) {
        Ok(d) if !d.is_zero() => d,
        _ => eyre::bail!(
            "--seconds must be a positive, representable duration, got {}",
            args.seconds
        ),
    };
    let (basin, ctrl) = assemble(cfg)?;

    // Apply the whole schedule before starting so a bad row aborts cleanly.
    if let Some(path) = args.schedule {
        let rows = dosectl_config::load_schedule_csv(path)?;
        for (idx, row) in rows.iter().enumerate() {
            ctrl.schedule_in(row.offset_s, row.duration_s, row.flow_rate)
                .wrap_err_with(|| format!("schedule CSV row {}", idx + 2))?;
        }
        tracing::info!(entries = rows.len(), path = %path.display(), "schedule loaded");
    }

    ctrl.start(args.mode)?;
    if let Some(secs) = args.manual_dose {
        if let Err(e) = ctrl.manual_dose(secs, args.flow) {
            let _ = ctrl.stop();
            return Err(e);
        }
    }

    let started = Instant::now();
    let mut next_status = args.status_every;
    while !shutdown.load(Ordering::Relaxed) {
        let elapsed = started.elapsed();
        if elapsed >= limit {
            break;
        }
        if elapsed >= next_status {
            print_status(&ctrl.status(), elapsed, json_mode);
            next_status += args.status_every;
        }
        std::thread::sleep(Duration::from_millis(10).min(limit.saturating_sub(elapsed)));
    }
    if shutdown.load(Ordering::Relaxed) {
        tracing::info!("interrupted; stopping controller");
    }

    ctrl.stop()?;
    let status = ctrl.status();
    print_status(&status, started.elapsed(), json_mode);
    let summary = ctrl.history_summary(None);
    if json_mode {
        println!(
            "{}",
            json!({
                "event": "summary",
                "dose_counter": status.dose_counter,
                "doses": summary,
                "turbidity": basin.turbidity(),
                "total_dosed_ml": basin.total_dosed_ml(),
            })
        );
    } else {
        println!(
            "run complete: {} doses ({} manual, {} automatic, {} scheduled), {:.3} ml, turbidity {:.4}",
            summary.count,
            summary.manual,
            summary.automatic,
            summary.scheduled,
            basin.total_dosed_ml(),
            basin.turbidity(),
        );
    }
    Ok(())
}

pub fn self_check(cfg: &dosectl_config::Config, json_mode: bool) -> eyre::Result<()> {
    let (_basin, ctrl) = assemble(cfg)?;
    let reading = ctrl.read_measurement()?;
    ctrl.set_mode(Mode::Manual)?;
    ctrl.manual_dose(1.0, None)?;
    ctrl.set_mode(Mode::Disabled)?;
    if json_mode {
        println!("{}", json!({ "event": "self_check", "ok": true, "reading": reading }));
    } else {
        println!("self-check OK: sensor={reading:.4} pump round-trip ok");
    }
    Ok(())
}

pub fn check_config(cfg: &dosectl_config::Config, json_mode: bool) {
    let core = ControllerConfig::from(cfg);
    let lc = LoopCfg::from(&cfg.control_loop);
    if json_mode {
        println!(
            "{}",
            json!({
                "event": "config",
                "ok": true,
                "thresholds": core.thresholds(),
                "flow_curve": core.flow_curve,
                "min_flow_rate": core.min_flow_rate,
                "max_flow_rate": core.max_flow_rate,
                "default_flow_rate": core.default_flow_rate,
                "tick_ms": cfg.control_loop.tick_ms,
            })
        );
    } else {
        let t = core.thresholds();
        println!(
            "config OK: low={} target={} high={} flow={}..{} ml/h (default {}) curve={:?} tick={:?}",
            t.low,
            t.target,
            t.high,
            core.min_flow_rate,
            core.max_flow_rate,
            core.default_flow_rate,
            core.flow_curve,
            lc.tick,
        );
    }
}
