#![no_main]
use crc_core::protocol::{DATA_SIZE, decode_frame, encode_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|frame: [u8; DATA_SIZE]| {
    if let Ok(f) = decode_frame(&frame) {
        let again = decode_frame(&encode_frame(f.isotope.code(), f.unit.index(), f.activity))
            .expect("re-encoded frame decodes");
        assert_eq!(again.isotope, f.isotope);
        assert_eq!(again.unit, f.unit);
        assert_eq!(again.activity.to_bits(), f.activity.to_bits());
    }
});
