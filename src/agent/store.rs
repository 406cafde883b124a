// Coverage-store capability.
//
// The agent never touches process-global coverage state; it is handed a
// `CoverageStore` that can produce a snapshot of raw metadata and counter
// bytes and can clear the counters. Individual calls must be safe to make
// from several connections at once. Nothing serializes a reset against an
// in-flight export.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use tempfile::NamedTempFile;

use super::error::StoreError;
use crate::format::{CounterSnapshot, encode_counters};

/// Raw artifacts captured at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub meta: Vec<u8>,
    pub counters: Vec<u8>,
}

/// Source of coverage snapshots.
pub trait CoverageStore: Send + Sync {
    /// Capture the current metadata and counters.
    fn snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Clear every counter.
    fn reset(&self) -> Result<(), StoreError>;
}

impl<T: CoverageStore + ?Sized> CoverageStore for std::sync::Arc<T> {
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        (**self).snapshot()
    }

    fn reset(&self) -> Result<(), StoreError> {
        (**self).reset()
    }
}

/// Zeroed counter stream with as many values as `counters` holds.
fn zeroed(counters: &[u8]) -> Result<Vec<u8>, StoreError> {
    let snap = CounterSnapshot::decode(counters)
        .map_err(|e| StoreError::Transient(format!("counters unreadable during reset: {e}")))?;
    Ok(encode_counters(&vec![0; snap.len()]))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store: a producer publishes buffers, the agent snapshots them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new(meta: Vec<u8>, counters: Vec<u8>) -> Self {
        Self {
            current: Mutex::new(Snapshot { meta, counters }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace both buffers.
    pub fn publish(&self, meta: Vec<u8>, counters: Vec<u8>) {
        *self.lock() = Snapshot { meta, counters };
    }

    /// Replace only the counters, keeping the metadata.
    pub fn publish_counters(&self, counters: Vec<u8>) {
        self.lock().counters = counters;
    }
}

impl CoverageStore for MemoryStore {
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.lock().clone())
    }

    fn reset(&self) -> Result<(), StoreError> {
        let mut current = self.lock();
        current.counters = zeroed(&current.counters)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Store backed by a metadata file and a counters file that some producer
/// rewrites in place.
#[derive(Debug, Clone)]
pub struct FileStore {
    meta_path: PathBuf,
    counters_path: PathBuf,
}

impl FileStore {
    pub fn new(meta_path: impl Into<PathBuf>, counters_path: impl Into<PathBuf>) -> Self {
        Self {
            meta_path: meta_path.into(),
            counters_path: counters_path.into(),
        }
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn counters_path(&self) -> &Path {
        &self.counters_path
    }

    fn read(path: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(path).map_err(|e| match e.kind() {
            // Not flushed yet, or mid-replace by the producer.
            io::ErrorKind::NotFound => {
                StoreError::Transient(format!("{} does not exist yet", path.display()))
            }
            _ => StoreError::Io(e),
        })
    }
}

impl CoverageStore for FileStore {
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let meta = Self::read(&self.meta_path)?;
        let counters = Self::read(&self.counters_path)?;
        debug!(
            "snapshot: {} meta bytes, {} counter bytes",
            meta.len(),
            counters.len()
        );
        Ok(Snapshot { meta, counters })
    }

    fn reset(&self) -> Result<(), StoreError> {
        let counters = match fs::read(&self.counters_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let zeros = zeroed(&counters)?;

        // A private temp file per call, so overlapping resets never share one.
        let dir = match self.counters_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&zeros)?;
        tmp.persist(&self.counters_path).map_err(|e| StoreError::Io(e.error))?;
        info!(
            "reset {} counters in {}",
            zeros.len(),
            self.counters_path.display()
        );
        Ok(())
    }
}
