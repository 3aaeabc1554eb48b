#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = dosectl_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // Anything the loader accepts must also satisfy the controller's own checks.
    let core = dosectl_core::ControllerConfig::from(&cfg);
    assert!(core.validate().is_ok(), "accepted config rejected by controller: {core:?}");
    let lc = dosectl_core::LoopCfg::from(&cfg.control_loop);
    assert!(lc.validate().is_ok(), "accepted loop config rejected: {lc:?}");
});
