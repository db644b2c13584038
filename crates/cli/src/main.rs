// mirrorsync CLI - pair master and slave exports and report column-level sync decisions

mod exit_codes;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use exit_codes::EXIT_SUCCESS;

#[derive(Parser)]
#[command(name = "msync")]
#[command(about = "Match records of two sources and decide column-level sync updates")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match both sources and compute sync decisions from a TOML config file
    #[command(after_help = "\
Examples:
  msync run act-wp.sync.toml
  msync run act-wp.sync.toml --json
  msync run act-wp.sync.toml --output report.json
  msync -vv run act-wp.sync.toml")]
    Run {
        /// Path to the .sync.toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file (overrides [output] json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate a sync config without running
    #[command(after_help = "\
Examples:
  msync validate act-wp.sync.toml")]
    Validate {
        /// Path to the .sync.toml config file
        config: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  mirrorsync-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
        "\nreport_version: 1",
    )
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, json, output } => sync::cmd_run(config, json, output),
        Commands::Validate { config } => sync::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}
