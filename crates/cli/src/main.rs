use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use pathwatcher::BackendKind;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

mod cmd;

#[derive(Parser)]
#[command(name = "pw")]
#[command(author, version, about = "Native file change notifications", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch paths and print their events until Ctrl-C
    Watch {
        /// Directories or files to watch
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Watch subdirectories too (generic backend only)
        #[arg(long)]
        recursive: bool,

        /// Backend to run
        #[arg(long, value_parser = parse_backend)]
        backend: Option<BackendKind>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,

        /// Print backend counters on exit
        #[arg(long)]
        stats: bool,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    s.parse().map_err(|e: pathwatcher::ConfigError| e.to_string())
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the subscriber; the guard must outlive every log call
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let builder = tracing_subscriber::fmt().with_max_level(log_level(verbose));

    let Some(log_file) = log_file else {
        builder.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = log_file
        .file_name()
        .with_context(|| format!("Invalid log file: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    builder.with_writer(writer).with_ansi(false).init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Watch { paths, recursive, backend, json, stats, config } => {
            let options = cmd::watch::WatchOptions { recursive, backend, json, stats };
            cmd::watch::run(&paths, config.as_deref(), options).await
        }
        Commands::Config { config } => cmd::config::run(config.as_deref()),
    }
}
