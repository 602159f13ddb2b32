//! CLI entry point: parses arguments, loads and compiles the route
//! configuration, and runs the Supervisor to completion.

use std::fs;
use std::io::Read;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use pcapsplit::capture::ClassifyPolicy;
use pcapsplit::config::RawConfig;
use pcapsplit::error::RouterError;
use pcapsplit::{self_test, supervisor};

/// Capture packets from one or more sources and split them into per-protocol
/// pcap files according to a routing configuration.
#[derive(Debug, Parser)]
#[command(name = "pcapsplit", version)]
struct Cli {
    /// Path to the YAML routing configuration, or "-" to read from stdin.
    #[arg(short, long, value_name = "FILE|-", default_value = "-")]
    config: String,

    /// Raise the log level to debug.
    #[arg(short, long)]
    verbose: bool,

    /// Abort the capturing worker on the first unparseable frame instead of
    /// logging, counting, and dropping it.
    #[arg(long)]
    strict_classify: bool,

    /// Run the built-in self-test and exit.
    #[arg(long)]
    self_test: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.self_test {
        return if self_test::run() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    let raw = match load_config(&cli.config) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(2);
        }
    };

    let policy = if cli.strict_classify {
        ClassifyPolicy::Abort
    } else {
        ClassifyPolicy::DropAndCount
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!("interrupt received, shutting down");
            interrupted.store(true, Ordering::Relaxed);
            shutdown.store(true, Ordering::Relaxed);
        }) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match supervisor::run(raw, policy, shutdown, interrupted) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pcapsplit={default_level}").into()),
        )
        .init();
}

/// Load the routing configuration from a file, or from standard input when
/// `path` is `"-"` (the CLI's default), per the spec's `-c/--config` surface.
fn load_config(path: &str) -> Result<RawConfig, RouterError> {
    let text = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| RouterError::Config(format!("reading stdin: {e}")))?;
        buf
    } else {
        fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("reading {path}: {e}")))?
    };
    pcapsplit::config::parse_config(&text)
        .map_err(|e| RouterError::Config(format!("parsing {path}: {e}")))
}
