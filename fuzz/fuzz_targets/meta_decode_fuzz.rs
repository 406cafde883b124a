#![no_main]
use covagent::format::{DecodeLimits, MetaFile};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Keep allocations bounded for hostile counter counts.
    let limits = DecodeLimits { max_entries: 1 << 16 };
    if let Ok(meta) = MetaFile::decode(data, &limits) {
        for (i, entry) in meta.entries.iter().enumerate() {
            assert_eq!(entry.counter_id.index(), i);
        }
    }
});
