// TCP export agent.
//
// One long-lived accept loop; every accepted connection is handled on its
// own thread. There is no connection cap. Capture, decode and emission run
// synchronously on the connection's thread.
//
// Per-connection state machine:
//
//   AwaitCommand --RESET--> Resetting --> Closed
//        |
//        +--anything else / timeout--> Exporting --> Closed
//
// `Closed` always shuts the socket down, whatever path led there.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::error::{AgentError, ExportError};
use super::protocol::{Command, Framing, MAX_COMMAND_LEN, RESET_REPLY, write_report_blocks};
use super::store::CoverageStore;
use crate::format::{CounterSnapshot, DecodeLimits, MetaFile};
use crate::report::Report;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8192";

/// Default label carried in the first response block.
pub const DEFAULT_LABEL: &str = "LCOV coverage data";

/// Connection-handling options.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Response framing for exports.
    pub framing: Framing,
    /// Honour `RESET`; when false it is treated as an export request.
    pub supports_reset: bool,
    /// Export attempts before giving up (at least one is always made).
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// How long to wait for the command line.
    pub command_timeout: Duration,
    /// Payload of the label block.
    pub label: String,
    /// Limits applied when decoding metadata.
    pub limits: DecodeLimits,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Blocked,
            supports_reset: true,
            max_attempts: 3,
            retry_delay: Duration::from_millis(50),
            command_timeout: Duration::from_millis(100),
            label: DEFAULT_LABEL.to_owned(),
            limits: DecodeLimits::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Export pipeline
// ---------------------------------------------------------------------------

/// One capture -> decode -> join attempt.
pub fn capture_report<S: CoverageStore + ?Sized>(
    store: &S,
    limits: &DecodeLimits,
) -> Result<Report, ExportError> {
    let snapshot = store.snapshot()?;
    let meta = MetaFile::decode(&snapshot.meta, limits)?;
    let counts = CounterSnapshot::decode(&snapshot.counters)?;
    if counts.len() != meta.entries.len() {
        debug!(
            "counter snapshot has {} values for {} metadata entries",
            counts.len(),
            meta.entries.len()
        );
    }
    Ok(Report::build(&meta.entries, &counts))
}

/// Run `capture_report` under the retry policy and render the first success.
pub fn export_with_retry<S: CoverageStore + ?Sized>(
    store: &S,
    options: &AgentOptions,
) -> Result<String, ExportError> {
    let attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match capture_report(store, &options.limits) {
            Ok(report) => return Ok(report.render()),
            Err(e) if attempt < attempts && e.is_retryable() => {
                warn!(
                    "export attempt {attempt}/{attempts} failed ({}): {e}",
                    e.kind()
                );
                thread::sleep(options.retry_delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(ExportError::Exhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitCommand,
    Resetting,
    Exporting,
    Closed,
}

/// Read the command line, waiting at most `timeout`.
///
/// A timeout, an empty line or end of stream all yield an empty string,
/// which parses as an export request.
fn read_command<R: Read>(reader: R) -> io::Result<String> {
    let mut reader = BufReader::new(reader).take(MAX_COMMAND_LEN);
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(_) => {}
        // Whatever arrived before the deadline is kept in `line`.
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
        Err(e) => return Err(e),
    }
    Ok(String::from_utf8_lossy(&line).trim().to_owned())
}

fn write_export(stream: &TcpStream, options: &AgentOptions, report: &str) -> io::Result<()> {
    let mut w = BufWriter::new(stream);
    match options.framing {
        Framing::Blocked => write_report_blocks(&mut w, &options.label, report.as_bytes())?,
        Framing::Raw => w.write_all(report.as_bytes())?,
    }
    w.flush()
}

/// Drive one connection through the state machine and close it.
pub fn handle_connection<S: CoverageStore + ?Sized>(
    stream: TcpStream,
    store: &S,
    options: &AgentOptions,
) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "<unknown>".to_owned(), |a| a.to_string());
    debug!("[{peer}] connection accepted");

    let mut state = State::AwaitCommand;
    while state != State::Closed {
        state = match state {
            State::AwaitCommand => {
                if let Err(e) = stream.set_read_timeout(Some(options.command_timeout)) {
                    warn!("[{peer}] cannot set read timeout: {e}");
                }
                match read_command(&stream) {
                    Ok(line) => match Command::parse(&line) {
                        Command::Reset if options.supports_reset => State::Resetting,
                        _ => State::Exporting,
                    },
                    Err(e) => {
                        warn!("[{peer}] failed to read command: {e}");
                        State::Closed
                    }
                }
            }
            State::Resetting => {
                info!("[{peer}] reset requested");
                match store.reset() {
                    Ok(()) => {
                        if let Err(e) = (&stream).write_all(RESET_REPLY) {
                            warn!("[{peer}] failed to send reset reply: {e}");
                        }
                    }
                    Err(e) => error!("[{peer}] reset failed ({}): {e}", e.kind()),
                }
                State::Closed
            }
            State::Exporting => {
                info!("[{peer}] export requested");
                match export_with_retry(store, options) {
                    Ok(report) => match write_export(&stream, options, &report) {
                        Ok(()) => info!("[{peer}] export sent ({} bytes)", report.len()),
                        Err(e) => warn!("[{peer}] client went away during export: {e}"),
                    },
                    Err(e) => error!("[{peer}] export failed ({}): {e}", e.kind()),
                }
                State::Closed
            }
            State::Closed => State::Closed,
        };
    }

    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!("[{peer}] shutdown: {e}");
    }
    debug!("[{peer}] connection closed");
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A bound export agent.
pub struct Agent<S: CoverageStore + 'static> {
    listener: TcpListener,
    store: Arc<S>,
    options: Arc<AgentOptions>,
}

impl<S: CoverageStore + 'static> fmt::Debug for Agent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("listener", &self.listener)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: CoverageStore + 'static> Agent<S> {
    /// Bind the listener. Failure here is fatal for the agent.
    pub fn bind<A: ToSocketAddrs + fmt::Display>(
        addr: A,
        store: Arc<S>,
        options: AgentOptions,
    ) -> Result<Self, AgentError> {
        let listener = TcpListener::bind(&addr).map_err(|source| AgentError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            store,
            options: Arc::new(options),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AgentError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Accept connections forever. Per-connection failures are logged and
    /// never stop the loop.
    pub fn run(self) -> Result<(), AgentError> {
        info!("coverage agent listening on {}", self.local_addr()?);
        for conn in self.listener.incoming() {
            let stream = match conn {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            let store = Arc::clone(&self.store);
            let options = Arc::clone(&self.options);
            let spawned = thread::Builder::new()
                .name("covagent-conn".into())
                .spawn(move || handle_connection(stream, &*store, &options));
            if let Err(e) = spawned {
                error!("failed to spawn connection handler: {e}");
            }
        }
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<Result<(), AgentError>>> {
        thread::Builder::new()
            .name("covagent-listener".into())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::StoreError;
    use crate::agent::store::{MemoryStore, Snapshot};
    use crate::format::{MetaWriter, encode_counters};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixture() -> MemoryStore {
        let mut w = MetaWriter::new();
        w.add_function("foo", "main.go", 10, 20, 1);
        MemoryStore::new(w.finish(), encode_counters(&[5]))
    }

    /// Fails `failures` times with a torn snapshot, then delegates.
    struct Flaky {
        inner: MemoryStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl CoverageStore for Flaky {
        fn snapshot(&self) -> Result<Snapshot, StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                let mut snap = self.inner.snapshot()?;
                snap.meta.truncate(10);
                return Ok(snap);
            }
            self.inner.snapshot()
        }

        fn reset(&self) -> Result<(), StoreError> {
            self.inner.reset()
        }
    }

    fn fast_options(max_attempts: u32) -> AgentOptions {
        AgentOptions {
            max_attempts,
            retry_delay: Duration::from_millis(1),
            ..AgentOptions::default()
        }
    }

    #[test]
    fn read_command_variants() {
        assert_eq!(read_command(&b"RESET\n"[..]).unwrap(), "RESET");
        assert_eq!(read_command(&b"  RESET  \nextra"[..]).unwrap(), "RESET");
        assert_eq!(read_command(&b""[..]).unwrap(), "");
        let long = vec![b'A'; 1000];
        assert_eq!(read_command(&long[..]).unwrap().len(), MAX_COMMAND_LEN as usize);
    }

    #[test]
    fn capture_literal_report() {
        let report = capture_report(&fixture(), &DecodeLimits::default()).unwrap();
        let text = report.render();
        assert!(text.starts_with("SF:main.go\nFN:10,foo\nFNDA:5,foo\nDA:10,5\n"));
    }

    #[test]
    fn retry_recovers_from_torn_snapshot() {
        let store = Flaky {
            inner: fixture(),
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let text = export_with_retry(&store, &fast_options(3)).unwrap();
        assert!(text.contains("FNDA:5,foo"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_bound() {
        let store = Flaky {
            inner: fixture(),
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = export_with_retry(&store, &fast_options(3)).unwrap_err();
        assert!(matches!(err, ExportError::Exhausted { attempts: 3, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn resource_errors_are_not_retried() {
        struct Broken;
        impl CoverageStore for Broken {
            fn snapshot(&self) -> Result<Snapshot, StoreError> {
                Err(StoreError::Unsupported("snapshot"))
            }
            fn reset(&self) -> Result<(), StoreError> {
                Err(StoreError::Unsupported("reset"))
            }
        }
        let err = export_with_retry(&Broken, &fast_options(5)).unwrap_err();
        assert!(matches!(err, ExportError::Exhausted { attempts: 1, .. }));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let text = export_with_retry(&fixture(), &fast_options(0)).unwrap();
        assert!(text.ends_with("end_of_record\n"));
    }

    #[test]
    fn bind_failure_is_reported() {
        let first = Agent::bind("127.0.0.1:0", Arc::new(fixture()), AgentOptions::default())
            .unwrap();
        let addr = first.local_addr().unwrap();
        let err = Agent::bind(addr, Arc::new(fixture()), AgentOptions::default()).unwrap_err();
        assert!(matches!(err, AgentError::Bind { .. }));
    }
}
