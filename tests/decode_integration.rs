// Decoding and emission against hand-assembled artifacts.

use covagent::format::{
    CounterId, DecodeError, DecodeLimits, ErrorKind, META_HEADER_SIZE, META_MAGIC, MetaFile,
    MetaWriter, decode_counters, decode_meta, encode_counters,
};
use covagent::report::{Report, emit_lcov};

/// Build a metadata file byte by byte, without `MetaWriter`.
fn hand_built(strings: &[&str], records: &[[u8; 5]]) -> Vec<u8> {
    let mut strtab = vec![strings.len() as u8];
    for s in strings {
        strtab.push(s.len() as u8);
        strtab.extend_from_slice(s.as_bytes());
    }
    let mut blob = vec![1u8, 1, 1];
    for r in records {
        blob.extend_from_slice(r);
    }

    let strtab_off = META_HEADER_SIZE + 16;
    let blob_off = strtab_off + strtab.len();
    let total = blob_off + blob.len();

    let mut out = vec![0u8; META_HEADER_SIZE];
    out[0..4].copy_from_slice(&META_MAGIC);
    out[4..8].copy_from_slice(&1u32.to_le_bytes());
    out[8..16].copy_from_slice(&(total as u64).to_le_bytes());
    out[16..24].copy_from_slice(&1u64.to_le_bytes());
    out[40..44].copy_from_slice(&(strtab_off as u32).to_le_bytes());
    out[44..48].copy_from_slice(&(strtab.len() as u32).to_le_bytes());
    out[48] = 1;
    out[49] = 1;
    out.extend_from_slice(&(blob_off as u64).to_le_bytes());
    out.extend_from_slice(&(blob.len() as u64).to_le_bytes());
    out.extend_from_slice(&strtab);
    out.extend_from_slice(&blob);
    out
}

#[test]
fn literal_scenario_end_to_end() {
    let meta = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 1]]);
    let entries = decode_meta(&meta).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].counter_id, CounterId(0));

    let counts = decode_counters(&encode_counters(&[5])).unwrap();
    let lcov = emit_lcov(&entries, &counts);
    assert_eq!(
        lcov,
        "SF:main.go\nFN:10,foo\nFNDA:5,foo\nDA:10,5\nFNF:1\nFNH:1\nLF:1\nLH:1\nend_of_record\n"
    );
}

#[test]
fn hand_built_matches_writer() {
    let mut w = MetaWriter::new();
    w.add_function("foo", "main.go", 10, 20, 1);
    let hand = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 1]]);
    assert_eq!(w.finish(), hand);
}

#[test]
fn every_truncation_fails_cleanly() {
    let mut w = MetaWriter::new();
    w.begin_package()
        .add_function("main", "cmd/main.go", 5, 12, 2)
        .add_function("helper", "cmd/main.go", 14, 20, 1);
    w.begin_package().add_function("Parse", "lib/parse.go", 3, 40, 3);
    let data = w.finish();

    for len in 0..data.len() {
        let err = decode_meta(&data[..len]).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::Format | ErrorKind::OutOfBounds),
            "len {len}: {err}"
        );
    }
    assert_eq!(decode_meta(&data).unwrap().len(), 6);
}

#[test]
fn bad_magic_is_invalid_format() {
    let mut meta = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 1]]);
    meta[1] = b'X';
    assert!(matches!(
        decode_meta(&meta),
        Err(DecodeError::InvalidFormat { .. })
    ));
}

#[test]
fn string_index_out_of_range_is_invalid_format() {
    let meta = hand_built(&["foo", "main.go"], &[[0, 2, 10, 20, 1]]);
    assert!(matches!(
        decode_meta(&meta),
        Err(DecodeError::InvalidFormat { .. })
    ));
}

#[test]
fn package_offset_past_end_is_out_of_bounds() {
    let mut meta = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 1]]);
    let bogus = (meta.len() as u64).to_le_bytes();
    meta[META_HEADER_SIZE..META_HEADER_SIZE + 8].copy_from_slice(&bogus);
    let err = decode_meta(&meta).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds, "{err}");
}

#[test]
fn huge_package_count_is_out_of_bounds() {
    let mut meta = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 1]]);
    meta[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
    let err = decode_meta(&meta).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds, "{err}");
}

#[test]
fn entry_limit_is_enforced() {
    let meta = hand_built(&["foo", "main.go"], &[[0, 1, 10, 20, 100]]);
    let err = MetaFile::decode(&meta, &DecodeLimits { max_entries: 10 }).unwrap_err();
    assert!(matches!(err, DecodeError::LimitExceeded { .. }), "{err}");
    assert_eq!(
        MetaFile::decode(&meta, &DecodeLimits { max_entries: 100 })
            .unwrap()
            .entries
            .len(),
        100
    );
}

#[test]
fn truncated_counter_stream_fails() {
    let mut bytes = encode_counters(&[1, 300, 70_000]);
    bytes.pop();
    assert!(decode_counters(&bytes).is_err());
    assert_eq!(decode_counters(&[]).unwrap(), Vec::<u64>::new());
}

#[test]
fn report_statistics() {
    let mut w = MetaWriter::new();
    w.add_function("a", "x.go", 1, 5, 2)
        .add_function("b", "x.go", 7, 9, 1)
        .add_function("c", "y.go", 2, 3, 1);
    let entries = decode_meta(&w.finish()).unwrap();
    let counts = decode_counters(&encode_counters(&[0, 4, 0, 1])).unwrap();
    let report = Report::build(&entries, &counts.into());

    assert_eq!(report.files.len(), 2);
    let x = &report.files[0];
    assert_eq!(&*x.path, "x.go");
    assert_eq!(x.functions_found(), 2);
    assert_eq!(x.functions_hit(), 1);
    // Both of a's counters share line 1; the first one (0) is kept.
    assert_eq!(x.lines_found(), 2);
    assert_eq!(x.lines_hit(), 0);
    let y = &report.files[1];
    assert_eq!(y.functions_hit(), 1);
    assert_eq!(y.lines_hit(), 1);
}
