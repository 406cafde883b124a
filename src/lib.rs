//! Covagent: exports binary coverage artifacts as LCOV over TCP.
//!
//! The crate provides:
//! - Decoders for the metadata and counter formats (`format`)
//! - The LCOV report builder (`report`)
//! - The TCP export agent, its stores and a client (`agent`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use covagent::format::{MetaWriter, encode_counters};
//! use covagent::report::emit_lcov;
//!
//! let mut meta = MetaWriter::new();
//! meta.add_function("foo", "main.go", 10, 20, 1);
//! let entries = covagent::format::decode_meta(&meta.finish()).unwrap();
//! let counts = covagent::format::decode_counters(&encode_counters(&[5])).unwrap();
//!
//! let lcov = emit_lcov(&entries, &counts);
//! assert!(lcov.starts_with("SF:main.go\nFN:10,foo\nFNDA:5,foo\n"));
//! ```

pub mod agent;
pub mod format;
pub mod io;
pub mod report;

#[cfg(feature = "cli")]
pub mod cli;
