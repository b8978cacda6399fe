use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod command_exec;
mod error;
mod input;

use error::CliError;

const LOG_ENV: &str = "SAFE_RELOCATE_LOG";
const DEFAULT_KEYRING_SERVICE: &str = "safe-relocate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// OS credential store; grants persist across runs.
    Keyring,
    /// Process-local; grants must come from the plan file.
    Memory,
}

#[derive(Debug, Parser)]
#[command(name = "safe-relocate")]
#[command(about = "Move files into sanitized folders under the home directory, safely.")]
struct Cli {
    /// Policy file (`.toml` or `.json`). Defaults apply when omitted.
    #[arg(long)]
    policy: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ErrorFormat::Text)]
    error_format: ErrorFormat,

    #[arg(long, value_enum, default_value_t = StoreKind::Keyring)]
    store: StoreKind,

    #[arg(long, default_value = DEFAULT_KEYRING_SERVICE)]
    keyring_service: String,

    /// Pretty-print JSON output.
    #[arg(long, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a destination path and print its components.
    Sanitize { destination: String },
    /// Check that a source is a regular, owner-readable file.
    Validate { source: PathBuf },
    /// Record access to a folder under home.
    Grant {
        #[arg(long)]
        key: String,
        #[arg(long)]
        folder: PathBuf,
        /// Pin the grant to this exact path instead of a well-known folder name.
        #[arg(long, default_value_t = false)]
        custom: bool,
    },
    Revoke {
        #[arg(long)]
        key: String,
    },
    /// Execute a JSON plan of proposed moves (`-` reads stdin).
    Run { plan: PathBuf },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let error_format = cli.error_format;
    if let Err(err) = run(&cli) {
        match error_format {
            ErrorFormat::Text => eprintln!("{err}"),
            ErrorFormat::Json => eprintln!("{}", error::render_json(&err)),
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let policy = match &cli.policy {
        Some(path) => safe_relocate::policy_io::load_policy(path)?,
        None => safe_relocate::RelocationPolicy::default(),
    };
    command_exec::run_with_policy(cli, policy)
}

pub(crate) fn serialize_json(value: &serde_json::Value, pretty: bool) -> Result<String, CliError> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

pub(crate) fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.write_all(b"\n"))
        .and_then(|()| stdout.flush())
        .map_err(|err| CliError::Tool(safe_relocate::Error::Io(err)))
}
