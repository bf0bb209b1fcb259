#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = crc_config::load_toml(data) {
        if cfg.validate().is_ok() {
            let _ = crc_core::settings_from_config(&cfg);
        }
    }
    let _ = crc_config::parse_threshold(data);
});
