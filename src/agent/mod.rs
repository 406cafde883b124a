// Coverage export agent.
//
// - `store`: the coverage-store capability (snapshot/reset) and stock implementations
// - `protocol`: command line parsing and block-framed responses
// - `server`: TCP listener, per-connection state machine, retry policy
// - `client`: fetch/reset helpers speaking the same protocol
// - `error`: store, export, agent and client errors

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::{FetchedReport, fetch, fetch_raw, reset};
pub use error::{AgentError, ClientError, ExportError, StoreError};
pub use protocol::{Block, BlockType, Command, Framing, ProtocolError, RESET_REPLY};
pub use server::{
    Agent, AgentOptions, DEFAULT_ADDR, capture_report, export_with_retry, handle_connection,
};
pub use store::{CoverageStore, FileStore, MemoryStore, Snapshot};
