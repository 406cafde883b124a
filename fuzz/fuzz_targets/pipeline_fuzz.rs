#![no_main]
use covagent::format::{CounterSnapshot, DecodeLimits, MetaFile};
use covagent::report::Report;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the split between metadata and counters.
    let split = (data[0] as usize * (data.len() - 1)) / 255;
    let (meta, counters) = data[1..].split_at(split.min(data.len() - 1));

    let limits = DecodeLimits { max_entries: 1 << 16 };
    let (Ok(meta), Ok(counts)) = (
        MetaFile::decode(meta, &limits),
        CounterSnapshot::decode(counters),
    ) else {
        return;
    };
    let text = Report::build(&meta.entries, &counts).render();
    assert_eq!(text.matches("end_of_record\n").count() > 0, !meta.entries.is_empty());
});
