// File-level helpers for offline export.
//
// `export_files()` decodes a metadata file and a counters file from disk and
// writes the LCOV report through a `BufWriter`. Optionally computes a
// streaming SHA-256 of the report (feature-gated behind `file-io`).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::format::{CounterSnapshot, DecodeError, DecodeLimits, MetaFile};
use crate::report::Report;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `export_files()` / `export_to_writer()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStats {
    /// Metadata file size in bytes.
    pub meta_size: u64,
    /// Counters file size in bytes.
    pub counters_size: u64,
    /// Packages declared by the metadata header.
    pub packages: u64,
    /// Function records decoded.
    pub functions: usize,
    /// Metadata entries (counter slots) decoded.
    pub entries: usize,
    /// Counter values decoded.
    pub counters: usize,
    /// Source files in the report.
    pub files: usize,
    /// Report size in bytes.
    pub report_size: u64,
    /// SHA-256 of the report (if `file-io` feature is enabled).
    pub report_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file export.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// I/O error (file open, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Metadata or counters did not decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Decode `meta_path` and `counters_path` and write the report to `writer`.
pub fn export_to_writer<W: Write>(
    meta_path: &Path,
    counters_path: &Path,
    writer: &mut W,
    limits: &DecodeLimits,
) -> Result<ExportStats, IoError> {
    let meta_bytes = std::fs::read(meta_path)?;
    let counter_bytes = std::fs::read(counters_path)?;

    let meta = MetaFile::decode(&meta_bytes, limits)?;
    let counts = CounterSnapshot::decode(&counter_bytes)?;
    let report = Report::build(&meta.entries, &counts);

    let mut counting = CountingWriter {
        inner: writer,
        written: 0,
        #[cfg(feature = "file-io")]
        hasher: sha2::Sha256::new(),
    };
    report.write_to(&mut counting)?;
    counting.flush()?;

    #[cfg(feature = "file-io")]
    let report_sha256 = Some(counting.hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let report_sha256: Option<[u8; 32]> = None;

    Ok(ExportStats {
        meta_size: meta_bytes.len() as u64,
        counters_size: counter_bytes.len() as u64,
        packages: meta.header.num_packages,
        functions: meta.functions,
        entries: meta.entries.len(),
        counters: counts.len(),
        files: report.files.len(),
        report_size: counting.written,
        report_sha256,
    })
}

/// Decode `meta_path` and `counters_path` and write the report to
/// `output_path`.
pub fn export_files(
    meta_path: &Path,
    counters_path: &Path,
    output_path: &Path,
    limits: &DecodeLimits,
) -> Result<ExportStats, IoError> {
    let file = File::create(output_path)?;
    let mut writer = BufWriter::with_capacity(BUF_SIZE, file);
    let stats = export_to_writer(meta_path, counters_path, &mut writer, limits)?;
    writer.flush()?;
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Counting / hashing writer
// ---------------------------------------------------------------------------

struct CountingWriter<'a, W: Write> {
    inner: &'a mut W,
    written: u64,
    #[cfg(feature = "file-io")]
    hasher: sha2::Sha256,
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        #[cfg(feature = "file-io")]
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Lowercase hex rendering of a digest.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
