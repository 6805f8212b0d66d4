#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = insulin_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // A validated config must convert into loop settings the builder accepts.
    if let Ok(settings) = insulin_core::LoopSettings::try_from(&cfg) {
        let _ = insulin_core::builder::validate_settings(&settings);
    }
});
