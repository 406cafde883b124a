#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    covagent::agent::protocol::fuzz_parse_exchange(data);
});
