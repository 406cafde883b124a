#![no_main]
use covagent::format::varint;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode or fail, never panic.
    if let Ok((value, len)) = varint::read_u64(data) {
        assert!(len <= varint::MAX_VARINT_LEN);
        // Padded encodings are accepted, so only the lower bound holds.
        assert!(len >= varint::sizeof_u64(value));
        // Re-encoding the value must decode back to it.
        let encoded = varint::encode_to_vec(value);
        assert_eq!(varint::read_u64(&encoded), Ok((value, encoded.len())));
    }

    // Any 8 bytes interpreted as a value must roundtrip.
    if data.len() >= 8 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[..8]);
        let value = u64::from_le_bytes(raw);
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let len = varint::encode_u64(value, &mut buf);
        assert_eq!(varint::read_u64(&buf[..len]), Ok((value, len)));
    }
});
