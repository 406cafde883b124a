#![no_main]
use covagent::format::{decode_counters, encode_counters};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(counts) = decode_counters(data) {
        // Canonical re-encoding decodes to the same values.
        assert_eq!(decode_counters(&encode_counters(&counts)).unwrap(), counts);
    }
});
