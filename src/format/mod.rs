// Binary coverage artifact formats.
//
// Everything in here reads untrusted bytes through `ByteCursor`; no
// decoder indexes a raw buffer directly.
//
// # Modules
//
// - `varint`: ULEB128 variable-length integers (base-128, least-significant group first)
// - `cursor`: bounds-checked sequential reader
// - `meta`: metadata file: header, offset tables, string table, function records
// - `counters`: counter file: flat varint stream
// - `error`: closed decode error taxonomy

pub mod counters;
pub mod cursor;
pub mod error;
pub mod meta;
pub mod varint;

pub use counters::{CounterSnapshot, decode_counters, encode_counters};
pub use cursor::ByteCursor;
pub use error::{DecodeError, ErrorKind};
pub use meta::{
    CounterId, DecodeLimits, META_HEADER_SIZE, META_MAGIC, MetaEntry, MetaFile, MetaFileHeader,
    MetaWriter, decode_meta,
};
