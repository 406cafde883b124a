// Coverage report generation.
//
// - `lcov`: joins metadata entries to counts and renders LCOV tracefiles

pub mod lcov;

pub use lcov::{FileRecord, FunctionSummary, LineHit, Report, emit_lcov};
