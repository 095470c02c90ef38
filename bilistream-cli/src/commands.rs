//! CLI command implementations

use std::path::PathBuf;

use anyhow::{Context, bail};
use bilistream_core::config::BilistreamConfig;
use bilistream_core::{DownloadService, VideoId};
use bilistream_web::{AppState, run_server};
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP download server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Download one video page to a file
    Fetch {
        /// BV id, av id or numeric id
        id: String,
        /// 1-based page index
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
        /// Quality tier (qn); defaults to 80
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        quality: Option<u32>,
        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command with context for display
pub async fn handle_command(command: Commands, config: BilistreamConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Fetch {
            id,
            page,
            quality,
            output,
        } => fetch(config, &id, page, quality, output).await,
    }
}

/// Start the server after checking its prerequisites
///
/// # Errors
/// - Remux tool not runnable or no session cookie configured
/// - Address could not be bound
async fn serve(
    mut config: BilistreamConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    if config.upstream.cookie.is_none() {
        bail!("no session cookie configured; set BILIBILI_COOKIE or pass --cookie");
    }

    let service = DownloadService::from_config(&config).context("failed to build download service")?;
    if !service.muxer_available().await {
        bail!(
            "remux tool {} is not runnable; install ffmpeg or set BILISTREAM_FFMPEG",
            config.mux.program.display()
        );
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
        }
        trigger.cancel();
    });

    run_server(&config.server, AppState::new(service), shutdown)
        .await
        .with_context(|| format!("server on {}:{} failed", config.server.host, config.server.port))
}

/// Download a single video page
///
/// # Errors
/// - Invalid id, upstream lookup, download, remux or write failure
async fn fetch(
    config: BilistreamConfig,
    raw_id: &str,
    page: u32,
    quality: Option<u32>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let id = VideoId::parse(raw_id)?;
    let service = DownloadService::from_config(&config).context("failed to build download service")?;

    match service.download_to(&id, page, quality, &output).await {
        Ok(bytes) => {
            println!("Saved {id} page {page} to {} ({bytes} bytes)", output.display());
            Ok(())
        }
        Err(e) => bail!("{} [stage: {}]: {e}", e.user_message(), e.stage()),
    }
}
