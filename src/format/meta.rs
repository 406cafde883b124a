// Coverage metadata file decoding and encoding.
//
// Layout (all fixed-width fields little-endian):
//
//   +-------------------------------+  0
//   | header fields (56 bytes)      |  magic, version, total_len, num_packages,
//   |                               |  hash, strtab offset/len, mode, granularity
//   | padding to 80 bytes           |
//   +-------------------------------+  80
//   | package offsets  (n x u64)    |
//   | package lengths  (n x u64)    |
//   +-------------------------------+
//   | string table / package blobs  |  located by absolute offsets
//   +-------------------------------+
//
// String table: varint count, then per string a varint byte length and the
// raw UTF-8 bytes.
//
// Package blob: 3-varint sub-header (version, counter mode, granularity),
// then function records until the blob is exhausted:
//   func_name_idx, file_name_idx, start_line, end_line, counter_count
//
// Every counter of every function gets the next global counter id, in
// package-table order, so ids are exactly 0..k-1.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::cursor::ByteCursor;
use super::error::DecodeError;
use super::varint;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const META_MAGIC: [u8; 4] = [0x00, b'c', b'v', b'm'];

/// Size of the fixed header area; the package tables start right after it.
pub const META_HEADER_SIZE: usize = 80;

/// Bytes actually occupied by header fields; the rest is zero padding.
const HEADER_FIELDS_SIZE: usize = 56;

/// Default cap on the number of entries one decode may produce (1 Mi).
pub const DEFAULT_MAX_ENTRIES: u64 = 1 << 20;

/// Version written by `MetaWriter`.
pub const META_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Zero-based decode-order index joining a metadata entry to its count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId(pub usize);

impl CounterId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CounterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One counter slot of one function.
///
/// A function with N counters yields N entries sharing name, file and lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub file_path: Arc<str>,
    pub func_name: Arc<str>,
    pub line_start: u32,
    pub line_end: u32,
    pub counter_id: CounterId,
}

/// Parsed fixed header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub total_len: u64,
    pub num_packages: u64,
    pub hash: [u8; 16],
    pub string_table_offset: u32,
    pub string_table_length: u32,
    pub mode: u8,
    pub granularity: u8,
    pub reserved: [u8; 6],
}

impl MetaFileHeader {
    /// Decode the header from the start of `data`.
    ///
    /// Fails with `InvalidFormat` if `data` is shorter than the header area
    /// or the magic does not match.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < META_HEADER_SIZE {
            return Err(DecodeError::invalid(format!(
                "buffer of {} bytes is shorter than the {META_HEADER_SIZE}-byte header",
                data.len()
            )));
        }
        let mut c = ByteCursor::new(data);
        let magic = c.read_array::<4>()?;
        if magic != META_MAGIC {
            return Err(DecodeError::invalid(format!(
                "bad magic: expected {META_MAGIC:02X?}, got {magic:02X?}"
            )));
        }
        Ok(Self {
            magic,
            version: c.read_u32_le()?,
            total_len: c.read_u64_le()?,
            num_packages: c.read_u64_le()?,
            hash: c.read_array::<16>()?,
            string_table_offset: c.read_u32_le()?,
            string_table_length: c.read_u32_le()?,
            mode: c.read_u8()?,
            granularity: c.read_u8()?,
            reserved: c.read_array::<6>()?,
        })
    }

    /// Serialize the header, padded to `META_HEADER_SIZE`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(META_HEADER_SIZE);
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.total_len.to_le_bytes());
        out.extend_from_slice(&self.num_packages.to_le_bytes());
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.string_table_offset.to_le_bytes());
        out.extend_from_slice(&self.string_table_length.to_le_bytes());
        out.extend_from_slice(&[self.mode, self.granularity]);
        out.extend_from_slice(&self.reserved);
        debug_assert_eq!(out.len(), HEADER_FIELDS_SIZE);
        out.resize(META_HEADER_SIZE, 0);
        out
    }
}

/// Resource limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Maximum number of entries (total counters) a single decode may emit.
    pub max_entries: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A fully decoded metadata file.
#[derive(Debug, Clone)]
pub struct MetaFile {
    pub header: MetaFileHeader,
    pub strings: Vec<Arc<str>>,
    /// Number of function records across all packages.
    pub functions: usize,
    /// Entries in decode order; `entries[i].counter_id == CounterId(i)`.
    pub entries: Vec<MetaEntry>,
}

impl MetaFile {
    /// Decode a metadata buffer. All-or-nothing.
    pub fn decode(data: &[u8], limits: &DecodeLimits) -> Result<Self, DecodeError> {
        let header = MetaFileHeader::decode(data)?;
        if header.total_len > data.len() as u64 {
            return Err(DecodeError::invalid(format!(
                "header declares {} bytes but buffer holds {}",
                header.total_len,
                data.len()
            )));
        }

        let whole = ByteCursor::new(data);
        let table_len = header
            .num_packages
            .checked_mul(8)
            .ok_or(DecodeError::OutOfBounds {
                what: "package offset table",
                start: META_HEADER_SIZE as u64,
                len: u64::MAX,
                buffer_len: data.len(),
            })?;
        let offsets = read_u64_table(
            &whole,
            "package offset table",
            META_HEADER_SIZE as u64,
            table_len,
        )?;
        let lengths = read_u64_table(
            &whole,
            "package length table",
            (META_HEADER_SIZE as u64).saturating_add(table_len),
            table_len,
        )?;

        let blobs = offsets
            .iter()
            .zip(&lengths)
            .map(|(&off, &len)| whole.region("package blob", off, len))
            .collect::<Result<Vec<_>, _>>()?;

        let strings = decode_string_table(whole.region(
            "string table",
            u64::from(header.string_table_offset),
            u64::from(header.string_table_length),
        )?)?;
        debug!("string table contains {} entries", strings.len());

        let mut out = PackageOutput {
            entries: Vec::new(),
            functions: 0,
        };
        for blob in blobs {
            decode_package(blob, &strings, limits, &mut out)?;
        }
        debug!(
            "decoded {} packages, {} functions, {} counters",
            header.num_packages,
            out.functions,
            out.entries.len()
        );

        Ok(Self {
            header,
            strings,
            functions: out.functions,
            entries: out.entries,
        })
    }
}

/// Decode a metadata buffer into its ordered entries using default limits.
pub fn decode_meta(data: &[u8]) -> Result<Vec<MetaEntry>, DecodeError> {
    MetaFile::decode(data, &DecodeLimits::default()).map(|m| m.entries)
}

// ---------------------------------------------------------------------------
// Decoding internals
// ---------------------------------------------------------------------------

fn read_u64_table(
    whole: &ByteCursor<'_>,
    what: &'static str,
    start: u64,
    len: u64,
) -> Result<Vec<u64>, DecodeError> {
    let mut c = whole.region(what, start, len)?;
    // The region fits in the buffer, so this allocation is bounded by it.
    let mut out = Vec::with_capacity(c.len() / 8);
    while !c.at_end() {
        out.push(c.read_u64_le()?);
    }
    Ok(out)
}

fn decode_string_table(mut c: ByteCursor<'_>) -> Result<Vec<Arc<str>>, DecodeError> {
    let count = c.read_varint()?;
    // Each string costs at least one length byte.
    let mut strings = Vec::with_capacity(count.min(c.remaining() as u64) as usize);
    for _ in 0..count {
        let len = c.read_varint()?;
        if len > c.remaining() as u64 {
            return Err(DecodeError::OutOfBounds {
                what: "string",
                start: c.position() as u64,
                len,
                buffer_len: c.len(),
            });
        }
        let bytes = c.read_bytes(len as usize)?;
        let s = std::str::from_utf8(bytes).map_err(|e| {
            DecodeError::invalid(format!("string {} is not UTF-8: {e}", strings.len()))
        })?;
        strings.push(Arc::from(s));
    }
    Ok(strings)
}

struct PackageOutput {
    entries: Vec<MetaEntry>,
    functions: usize,
}

fn lookup<'s>(
    strings: &'s [Arc<str>],
    idx: u64,
    field: &str,
) -> Result<&'s Arc<str>, DecodeError> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| strings.get(i))
        .ok_or_else(|| {
            DecodeError::invalid(format!(
                "{field} index {idx} out of range for string table of {}",
                strings.len()
            ))
        })
}

fn line(value: u64, field: &str) -> Result<u32, DecodeError> {
    u32::try_from(value).map_err(|_| DecodeError::invalid(format!("{field} {value} exceeds u32")))
}

fn decode_package(
    mut c: ByteCursor<'_>,
    strings: &[Arc<str>],
    limits: &DecodeLimits,
    out: &mut PackageOutput,
) -> Result<(), DecodeError> {
    if c.is_empty() {
        return Ok(());
    }

    // Sub-header: format version, counter mode, counter granularity.
    for _ in 0..3 {
        c.read_varint()?;
    }

    while !c.at_end() {
        let func_idx = c.read_varint()?;
        let file_idx = c.read_varint()?;
        let start_line = c.read_varint()?;
        let end_line = c.read_varint()?;
        let counter_count = c.read_varint()?;

        let func_name = lookup(strings, func_idx, "function name")?;
        let file_path = lookup(strings, file_idx, "file name")?;
        let line_start = line(start_line, "start line")?;
        let line_end = line(end_line, "end line")?;

        let requested = (out.entries.len() as u64).saturating_add(counter_count);
        if requested > limits.max_entries {
            return Err(DecodeError::LimitExceeded {
                what: "metadata entries",
                requested,
                limit: limits.max_entries,
            });
        }

        for _ in 0..counter_count {
            let counter_id = CounterId(out.entries.len());
            out.entries.push(MetaEntry {
                file_path: Arc::clone(file_path),
                func_name: Arc::clone(func_name),
                line_start,
                line_end,
                counter_id,
            });
        }
        out.functions += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// A function record with raw string-table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRecord {
    pub func_name: u64,
    pub file_name: u64,
    pub start_line: u64,
    pub end_line: u64,
    pub counters: u64,
}

/// Builds well-formed metadata buffers.
///
/// Strings are interned in first-use order, so adding `("foo", "main.go")`
/// to an empty writer produces the table `["foo", "main.go"]`.
#[derive(Debug, Clone)]
pub struct MetaWriter {
    strings: Vec<String>,
    index: HashMap<String, u64>,
    packages: Vec<Vec<FunctionRecord>>,
    pub version: u32,
    pub mode: u8,
    pub granularity: u8,
    pub hash: [u8; 16],
}

impl Default for MetaWriter {
    fn default() -> Self {
        Self {
            strings: Vec::new(),
            index: HashMap::new(),
            packages: Vec::new(),
            version: META_VERSION,
            mode: 1,
            granularity: 1,
            hash: [0u8; 16],
        }
    }
}

impl MetaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the table index of `s`, appending it if new.
    pub fn intern(&mut self, s: &str) -> u64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u64;
        self.strings.push(s.to_owned());
        self.index.insert(s.to_owned(), idx);
        idx
    }

    /// Start a new package; subsequent functions land in it.
    pub fn begin_package(&mut self) -> &mut Self {
        self.packages.push(Vec::new());
        self
    }

    /// Add a function to the current package (opening one if needed).
    pub fn add_function(
        &mut self,
        name: &str,
        file: &str,
        start_line: u32,
        end_line: u32,
        counters: u64,
    ) -> &mut Self {
        let func_name = self.intern(name);
        let file_name = self.intern(file);
        self.add_record(FunctionRecord {
            func_name,
            file_name,
            start_line: u64::from(start_line),
            end_line: u64::from(end_line),
            counters,
        })
    }

    /// Add a record verbatim, without validating its indices.
    pub fn add_record(&mut self, record: FunctionRecord) -> &mut Self {
        if self.packages.is_empty() {
            self.packages.push(Vec::new());
        }
        if let Some(pkg) = self.packages.last_mut() {
            pkg.push(record);
        }
        self
    }

    /// Total counters across all recorded functions.
    pub fn counter_count(&self) -> u64 {
        self.packages.iter().flatten().map(|r| r.counters).sum()
    }

    /// Serialize the metadata file.
    pub fn finish(&self) -> Vec<u8> {
        let mut strtab = Vec::new();
        varint::push_u64(&mut strtab, self.strings.len() as u64);
        for s in &self.strings {
            varint::push_u64(&mut strtab, s.len() as u64);
            strtab.extend_from_slice(s.as_bytes());
        }

        let blobs: Vec<Vec<u8>> = self
            .packages
            .iter()
            .map(|records| {
                let mut blob = Vec::new();
                for v in [u64::from(self.version), u64::from(self.mode), u64::from(self.granularity)] {
                    varint::push_u64(&mut blob, v);
                }
                for r in records {
                    for v in [r.func_name, r.file_name, r.start_line, r.end_line, r.counters] {
                        varint::push_u64(&mut blob, v);
                    }
                }
                blob
            })
            .collect();

        let n = blobs.len();
        let strtab_offset = META_HEADER_SIZE + 16 * n;
        let mut offset = strtab_offset + strtab.len();
        let mut offsets = Vec::with_capacity(n);
        for blob in &blobs {
            offsets.push(offset as u64);
            offset += blob.len();
        }

        let header = MetaFileHeader {
            magic: META_MAGIC,
            version: self.version,
            total_len: offset as u64,
            num_packages: n as u64,
            hash: self.hash,
            string_table_offset: strtab_offset as u32,
            string_table_length: strtab.len() as u32,
            mode: self.mode,
            granularity: self.granularity,
            reserved: [0u8; 6],
        };

        let mut out = header.to_bytes();
        out.reserve(offset - META_HEADER_SIZE);
        for off in &offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }
        for blob in &blobs {
            out.extend_from_slice(&(blob.len() as u64).to_le_bytes());
        }
        out.extend_from_slice(&strtab);
        for blob in &blobs {
            out.extend_from_slice(blob);
        }
        out
    }
}
