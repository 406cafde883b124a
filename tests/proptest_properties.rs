use covagent::format::varint::{self, MAX_VARINT_LEN};
use covagent::format::{
    CounterId, CounterSnapshot, DecodeError, MetaEntry, MetaWriter, decode_counters, decode_meta,
    encode_counters,
};
use covagent::report::{Report, emit_lcov};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// (name index, file index, start line, counters)
type FuncSpec = (u8, u8, u32, u8);

fn functions() -> impl Strategy<Value = Vec<FuncSpec>> {
    proptest::collection::vec((0u8..6, 0u8..4, 1u32..5000, 0u8..5), 0..40)
}

fn build_meta(funcs: &[FuncSpec], split: usize) -> (Vec<u8>, u64) {
    let mut w = MetaWriter::new();
    for (i, &(name, file, line, counters)) in funcs.iter().enumerate() {
        if i == 0 || (split > 0 && i % split == 0) {
            w.begin_package();
        }
        w.add_function(
            &format!("fn{name}"),
            &format!("pkg/file{file}.go"),
            line,
            line + 10,
            u64::from(counters),
        );
    }
    let total = w.counter_count();
    (w.finish(), total)
}

proptest! {
    #[test]
    fn prop_varint_roundtrip(n in any::<u64>()) {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let len = varint::encode_u64(n, &mut buf);
        prop_assert_eq!(len, varint::sizeof_u64(n));
        prop_assert_eq!(varint::read_u64(&buf[..len]), Ok((n, len)));
    }

    #[test]
    fn prop_varint_truncation_is_reported(n in 128u64..) {
        let bytes = varint::encode_to_vec(n);
        for cut in 0..bytes.len() {
            let err = varint::read_u64(&bytes[..cut]).unwrap_err();
            prop_assert_eq!(err, DecodeError::Truncated, "cut {} of {}", cut, bytes.len());
        }
    }

    #[test]
    fn prop_counter_stream_roundtrip(counts in proptest::collection::vec(any::<u64>(), 0..256)) {
        prop_assert_eq!(decode_counters(&encode_counters(&counts)).unwrap(), counts);
    }

    #[test]
    fn prop_counter_ids_are_gapless(funcs in functions(), split in 0usize..5) {
        let (meta, total) = build_meta(&funcs, split);
        let entries = decode_meta(&meta).unwrap();
        prop_assert_eq!(entries.len() as u64, total);
        for (i, e) in entries.iter().enumerate() {
            prop_assert_eq!(e.counter_id, CounterId(i));
        }
    }

    #[test]
    fn prop_join_sums_function_hits(funcs in functions(), seed in any::<u64>()) {
        let (meta, total) = build_meta(&funcs, 0);
        let entries = decode_meta(&meta).unwrap();
        let counts: Vec<u64> = (0..total).map(|i| (i ^ seed) % 1000).collect();
        let report = Report::build(&entries, &CounterSnapshot::new(counts.clone()));

        for file in &report.files {
            for func in &file.functions {
                let expected: u64 = entries
                    .iter()
                    .filter(|e| e.file_path == file.path && e.func_name == func.name)
                    .map(|e| counts[e.counter_id.index()])
                    .sum();
                prop_assert_eq!(func.hits, expected);
            }
        }
    }

    #[test]
    fn prop_one_da_line_per_distinct_line(funcs in functions(), split in 0usize..5) {
        let (meta, total) = build_meta(&funcs, split);
        let entries = decode_meta(&meta).unwrap();
        let counts = vec![3u64; total as usize];
        let report = Report::build(&entries, &CounterSnapshot::new(counts));

        for file in &report.files {
            let distinct: BTreeSet<u32> = entries
                .iter()
                .filter(|e| e.file_path == file.path)
                .map(|e| e.line_start)
                .collect();
            prop_assert_eq!(file.lines.len(), distinct.len());
            let emitted: BTreeSet<u32> = file.lines.iter().map(|l| l.line).collect();
            prop_assert_eq!(emitted, distinct);
        }
    }

    #[test]
    fn prop_short_counter_snapshot_never_fails(funcs in functions(), keep in 0usize..200) {
        let (meta, total) = build_meta(&funcs, 2);
        let entries = decode_meta(&meta).unwrap();
        let keep = keep.min(total as usize);
        let counts = vec![1u64; keep];
        let lcov = emit_lcov(&entries, &counts);

        let da_lines = lcov.lines().filter(|l| l.starts_with("DA:")).count();
        prop_assert!(da_lines <= keep);
        prop_assert_eq!(lcov.matches("end_of_record").count(), count_files(&entries));
    }

    #[test]
    fn prop_emission_is_deterministic(
        funcs in functions(),
        picks in proptest::collection::vec(any::<u8>(), 0..256)
    ) {
        let (meta, total) = build_meta(&funcs, 3);
        let entries = decode_meta(&meta).unwrap();
        let counts: Vec<u64> = (0..total).collect();
        let first = emit_lcov(&entries, &counts);

        // Same per-file sequences, merged in a different order across files.
        let reordered = interleave_by_file(&entries, &picks);
        prop_assert_eq!(reordered.len(), entries.len());
        prop_assert_eq!(&first, &emit_lcov(&reordered, &counts));

        let files: Vec<&str> = first
            .lines()
            .filter_map(|l| l.strip_prefix("SF:"))
            .collect();
        let mut sorted = files.clone();
        sorted.sort_unstable();
        prop_assert_eq!(files, sorted);
    }

    #[test]
    fn prop_decode_arbitrary_bytes_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_meta(&data);
        let _ = decode_counters(&data);
    }
}

/// Merge each file's entries, in their original relative order, choosing
/// the next file to draw from with `picks`.
fn interleave_by_file(entries: &[MetaEntry], picks: &[u8]) -> Vec<MetaEntry> {
    let mut queues: BTreeMap<&str, VecDeque<&MetaEntry>> = BTreeMap::new();
    for e in entries {
        queues.entry(&*e.file_path).or_default().push_back(e);
    }
    let mut queues: Vec<VecDeque<&MetaEntry>> = queues.into_values().rev().collect();

    let mut out = Vec::with_capacity(entries.len());
    let mut picks = picks.iter().cycle();
    while !queues.is_empty() {
        let at = picks.next().map_or(0, |&p| p as usize % queues.len());
        if let Some(e) = queues[at].pop_front() {
            out.push(e.clone());
        }
        if queues[at].is_empty() {
            queues.remove(at);
        }
    }
    out
}

fn count_files(entries: &[MetaEntry]) -> usize {
    let mut files: Vec<&str> = entries.iter().map(|e| &*e.file_path).collect();
    files.sort_unstable();
    files.dedup();
    files.len()
}
