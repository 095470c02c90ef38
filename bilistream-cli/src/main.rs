//! Bilistream CLI - Command-line interface
//!
//! Serves the download API or fetches a single video to disk.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use bilistream_core::config::BilistreamConfig;
use bilistream_core::tracing_setup::{CliLogLevel, LogSettings, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "bilistream")]
#[command(about = "Downloads and merges Bilibili DASH streams")]
#[command(version)]
struct Cli {
    /// Console log level; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Also write a debug log to bilistream.log in this directory
    #[arg(long, env = "BILISTREAM_LOG_DIR", global = true)]
    logs_dir: Option<PathBuf>,

    /// Session cookie sent to the API and the CDN
    #[arg(long, env = "BILIBILI_COOKIE", hide_env_values = true, global = true)]
    cookie: Option<String>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut logging = LogSettings::new(cli.log_level);
    if let Some(dir) = cli.logs_dir {
        logging = logging.with_logs_dir(dir);
    }
    init_tracing(&logging).context("failed to initialise logging")?;

    let mut config = BilistreamConfig::from_env();
    if let Some(cookie) = cli.cookie.filter(|cookie| !cookie.trim().is_empty()) {
        config.upstream.cookie = Some(cookie);
    }

    commands::handle_command(cli.command, config).await
}
