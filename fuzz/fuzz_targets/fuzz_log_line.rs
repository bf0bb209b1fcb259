#![no_main]
use crc_core::SampleRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(rec) = SampleRecord::from_log_line(data) {
        let line = rec.to_log_line().unwrap_or_default();
        let _ = SampleRecord::from_log_line(&line);
    }
});
