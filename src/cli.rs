// Command-line front end for the coverage agent.
//
// Subcommands:
//   serve    run the export agent over a metadata file and a counters file
//   fetch    request a report from a running agent
//   reset    ask a running agent to clear its counters
//   report   decode artifacts offline and write the report
//   inspect  print the decoded metadata header and table sizes
//   config   print build/configuration details

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};

use crate::agent::server::DEFAULT_LABEL;
use crate::agent::{self, Agent, AgentOptions, ClientError, FileStore, Framing};
use crate::format::meta::DEFAULT_MAX_ENTRIES;
use crate::format::{DecodeLimits, MetaFile};
use crate::io::{ExportStats, IoError, export_files, export_to_writer, hex};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 50;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 100;
const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Coverage export agent.
#[derive(Parser, Debug)]
#[command(
    name = "covagent",
    version,
    about = "Coverage export agent: binary coverage artifacts to LCOV over TCP",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve coverage reports over TCP.
    Serve(ServeArgs),
    /// Fetch a report from a running agent.
    Fetch(FetchArgs),
    /// Reset the counters of a running agent.
    Reset(ClientArgs),
    /// Decode metadata and counter files into a report.
    Report(ReportArgs),
    /// Print information about a metadata file.
    Inspect(InspectArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FramingArg {
    Raw,
    Blocked,
}

impl From<FramingArg> for Framing {
    fn from(f: FramingArg) -> Self {
        match f {
            FramingArg::Raw => Framing::Raw,
            FramingArg::Blocked => Framing::Blocked,
        }
    }
}

#[derive(Args, Debug)]
struct LimitArgs {
    /// Maximum metadata entries (total counters) accepted per decode.
    #[arg(long = "max-entries", default_value_t = DEFAULT_MAX_ENTRIES)]
    max_entries: u64,
}

impl LimitArgs {
    fn limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_entries: self.max_entries,
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, short = 'l', env = "COVAGENT_ADDR", default_value = agent::DEFAULT_ADDR)]
    listen: String,

    /// Metadata file published by the instrumented process.
    #[arg(long, value_hint = ValueHint::FilePath)]
    meta: PathBuf,

    /// Counters file published by the instrumented process.
    #[arg(long, value_hint = ValueHint::FilePath)]
    counters: PathBuf,

    /// Response framing.
    #[arg(long, value_enum, default_value_t = FramingArg::Blocked)]
    framing: FramingArg,

    /// Treat RESET as an ordinary export request.
    #[arg(long = "no-reset")]
    no_reset: bool,

    /// Export attempts before giving up.
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
    attempts: u32,

    /// Delay between attempts, in milliseconds.
    #[arg(long = "retry-delay-ms", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// How long to wait for a command line, in milliseconds.
    #[arg(long = "command-timeout-ms", default_value_t = DEFAULT_COMMAND_TIMEOUT_MS)]
    command_timeout_ms: u64,

    /// Label sent in the first response block.
    #[arg(long, default_value = DEFAULT_LABEL)]
    label: String,

    #[command(flatten)]
    limits: LimitArgs,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Agent address.
    #[arg(long, short = 'a', env = "COVAGENT_ADDR", default_value = agent::DEFAULT_ADDR)]
    addr: String,

    /// Socket timeout in seconds (0 disables).
    #[arg(long, default_value_t = DEFAULT_CLIENT_TIMEOUT_SECS)]
    timeout: u64,
}

impl ClientArgs {
    fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[command(flatten)]
    client: ClientArgs,

    /// Expect a raw (unframed) response.
    #[arg(long)]
    raw: bool,

    /// Output file (default: stdout).
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Metadata file.
    #[arg(long, value_hint = ValueHint::FilePath)]
    meta: PathBuf,

    /// Counters file.
    #[arg(long, value_hint = ValueHint::FilePath)]
    counters: PathBuf,

    /// Output file (default: stdout).
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    #[command(flatten)]
    limits: LimitArgs,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Metadata file.
    #[arg(value_hint = ValueHint::FilePath)]
    meta: PathBuf,

    #[command(flatten)]
    limits: LimitArgs,
}

/// Global flags shared by every command.
#[derive(Debug, Clone, Copy)]
struct Globals {
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open the output destination, refusing to clobber without `--force`.
fn open_output(path: Option<&Path>, globals: Globals) -> Result<Box<dyn Write>, i32> {
    match path {
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
        Some(path) => {
            if path.exists() && !globals.force {
                eprintln!(
                    "covagent: output file exists, use -f to overwrite: {}",
                    path.display()
                );
                return Err(1);
            }
            match File::create(path) {
                Ok(f) => Ok(Box::new(BufWriter::new(f))),
                Err(e) => {
                    eprintln!("covagent: output file: {}: {e}", path.display());
                    Err(1)
                }
            }
        }
    }
}

fn stats_json(stats: &ExportStats) -> serde_json::Value {
    serde_json::json!({
        "meta_size": stats.meta_size,
        "counters_size": stats.counters_size,
        "packages": stats.packages,
        "functions": stats.functions,
        "entries": stats.entries,
        "counters": stats.counters,
        "files": stats.files,
        "report_size": stats.report_size,
        "report_sha256": stats.report_sha256.as_ref().map(|d| hex(d)),
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_serve(args: ServeArgs) -> i32 {
    let store = Arc::new(FileStore::new(&args.meta, &args.counters));
    let options = AgentOptions {
        framing: args.framing.into(),
        supports_reset: !args.no_reset,
        max_attempts: args.attempts,
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        command_timeout: Duration::from_millis(args.command_timeout_ms),
        label: args.label,
        limits: args.limits.limits(),
    };

    let agent = match Agent::bind(args.listen.as_str(), store, options) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("covagent: serve: {e}");
            return 1;
        }
    };
    match agent.run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("covagent: serve: {e}");
            1
        }
    }
}

fn cmd_fetch(args: FetchArgs, globals: Globals) -> i32 {
    let timeout = args.client.timeout();
    let addr = args.client.addr.as_str();
    let result = if args.raw {
        agent::fetch_raw(addr, timeout)
    } else {
        agent::fetch(addr, timeout).map(|fetched| {
            if globals.verbose > 0 && !globals.quiet {
                eprintln!("covagent: fetch: {}", fetched.label);
            }
            fetched.report
        })
    };

    let report = match result {
        Ok(report) => report,
        Err(e @ ClientError::NoPayload) => {
            eprintln!("covagent: fetch: {e}");
            return 2;
        }
        Err(e) => {
            eprintln!("covagent: fetch: {e}");
            return 1;
        }
    };

    let mut out = match open_output(args.output.as_deref(), globals) {
        Ok(out) => out,
        Err(code) => return code,
    };
    if let Err(e) = out.write_all(report.as_bytes()).and_then(|()| out.flush()) {
        eprintln!("covagent: fetch: write: {e}");
        return 1;
    }
    if globals.json_output {
        eprintln!(
            "{}",
            serde_json::json!({ "addr": addr, "report_size": report.len() })
        );
    }
    0
}

fn cmd_reset(args: ClientArgs, globals: Globals) -> i32 {
    match agent::reset(args.addr.as_str(), args.timeout()) {
        Ok(()) => {
            if !globals.quiet {
                eprintln!("covagent: reset: counters cleared at {}", args.addr);
            }
            0
        }
        Err(e) => {
            eprintln!("covagent: reset: {e}");
            1
        }
    }
}

fn cmd_report(args: ReportArgs, globals: Globals) -> i32 {
    let limits = args.limits.limits();
    let result = match &args.output {
        Some(path) => {
            if path.exists() && !globals.force {
                eprintln!(
                    "covagent: output file exists, use -f to overwrite: {}",
                    path.display()
                );
                return 1;
            }
            export_files(&args.meta, &args.counters, path, &limits)
        }
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            export_to_writer(&args.meta, &args.counters, &mut out, &limits)
                .and_then(|stats| out.flush().map(|()| stats).map_err(IoError::from))
        }
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("covagent: report: {e}");
            return 1;
        }
    };

    if globals.json_output {
        eprintln!("{}", stats_json(&stats));
    } else if globals.verbose > 0 && !globals.quiet {
        eprintln!(
            "covagent: report: {} files, {} functions, {} entries, {} counters, {} bytes",
            stats.files, stats.functions, stats.entries, stats.counters, stats.report_size
        );
    }
    0
}

fn cmd_inspect(args: InspectArgs, globals: Globals) -> i32 {
    let data = match std::fs::read(&args.meta) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("covagent: inspect: {}: {e}", args.meta.display());
            return 1;
        }
    };
    let meta = match MetaFile::decode(&data, &args.limits.limits()) {
        Ok(meta) => meta,
        Err(e) => {
            eprintln!("covagent: inspect: {} ({}): {e}", args.meta.display(), e.kind());
            return 1;
        }
    };

    let h = &meta.header;
    if globals.json_output {
        let info = serde_json::json!({
            "version": h.version,
            "total_len": h.total_len,
            "packages": h.num_packages,
            "hash": hex(&h.hash),
            "string_table_offset": h.string_table_offset,
            "string_table_length": h.string_table_length,
            "mode": h.mode,
            "granularity": h.granularity,
            "strings": meta.strings.len(),
            "functions": meta.functions,
            "entries": meta.entries.len(),
        });
        println!("{info}");
        return 0;
    }

    println!("metadata file:          {}", args.meta.display());
    println!("version:                {}", h.version);
    println!("total length:           {}", h.total_len);
    println!("packages:               {}", h.num_packages);
    println!("hash:                   {}", hex(&h.hash));
    println!(
        "string table:           offset {} length {} ({} strings)",
        h.string_table_offset,
        h.string_table_length,
        meta.strings.len()
    );
    println!("counter mode:           {}", h.mode);
    println!("counter granularity:    {}", h.granularity);
    println!("functions:              {}", meta.functions);
    println!("counters:               {}", meta.entries.len());
    if globals.verbose > 0 {
        for s in &meta.strings {
            println!("  string: {s}");
        }
    }
    0
}

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("covagent version {version} (Rust)");
    let file_io = cfg!(feature = "file-io") as u8;
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_ADDR={}", agent::DEFAULT_ADDR);
    eprintln!("DEFAULT_ATTEMPTS={DEFAULT_ATTEMPTS}");
    eprintln!("DEFAULT_RETRY_DELAY_MS={DEFAULT_RETRY_DELAY_MS}");
    eprintln!("DEFAULT_COMMAND_TIMEOUT_MS={DEFAULT_COMMAND_TIMEOUT_MS}");
    eprintln!("DEFAULT_MAX_ENTRIES={DEFAULT_MAX_ENTRIES}");
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn default_filter(cmd: &Cmd, globals: Globals) -> &'static str {
    match (globals.quiet, globals.verbose, cmd) {
        (true, _, _) => "error",
        (false, 0, Cmd::Serve(_)) => "info",
        (false, 0, _) => "warn",
        (false, 1, _) => "info",
        _ => "debug",
    }
}

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let globals = Globals {
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(&cli.command, globals)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let exit_code = match cli.command {
        Cmd::Serve(args) => cmd_serve(args),
        Cmd::Fetch(args) => cmd_fetch(args, globals),
        Cmd::Reset(args) => cmd_reset(args, globals),
        Cmd::Report(args) => cmd_report(args, globals),
        Cmd::Inspect(args) => cmd_inspect(args, globals),
        Cmd::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv: Vec<String> = std::iter::once("covagent".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        Cli::try_parse_from(argv).expect("cli parse failed")
    }

    #[test]
    fn serve_defaults() {
        let cli = parse(&["serve", "--meta", "m", "--counters", "c"]);
        let Cmd::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.framing, FramingArg::Blocked);
        assert_eq!(args.attempts, DEFAULT_ATTEMPTS);
        assert_eq!(args.label, DEFAULT_LABEL);
        assert!(!args.no_reset);
        assert_eq!(args.limits.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn serve_requires_artifacts() {
        let argv = ["covagent", "serve", "--meta", "m"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn fetch_options() {
        let cli = parse(&["fetch", "--addr", "10.0.0.1:9000", "--raw", "--timeout", "0"]);
        let Cmd::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert!(args.raw);
        assert_eq!(args.client.addr, "10.0.0.1:9000");
        assert_eq!(args.client.timeout(), None);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let argv = ["covagent", "-q", "-v", "config"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn log_filter_by_command() {
        let globals = Globals {
            force: false,
            quiet: false,
            verbose: 0,
            json_output: false,
        };
        let serve = parse(&["serve", "--meta", "m", "--counters", "c"]).command;
        assert_eq!(default_filter(&serve, globals), "info");
        assert_eq!(default_filter(&Cmd::Config, globals), "warn");
        let loud = Globals {
            verbose: 2,
            ..globals
        };
        assert_eq!(default_filter(&Cmd::Config, loud), "debug");
    }
}
