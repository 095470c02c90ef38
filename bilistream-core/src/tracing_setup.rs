//! Log output for the server and the one-shot fetch command.
//!
//! The console shows bilistream's own events at the chosen level and keeps
//! HTTP client and server internals at `warn` or quieter. An optional log directory
//! receives a debug-level copy of every run.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Crates whose events follow the console level.
const OWN_TARGETS: [&str; 4] = ["bilistream", "bilistream_core", "bilistream_web", "tower_http"];

/// Log file inside the log directory, truncated at start-up.
pub const LOG_FILE_NAME: &str = "bilistream.log";

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Level of bilistream events on stderr
    pub console_level: Level,
    /// Directory for the debug log file; no file is written when unset
    pub logs_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn new(console_level: impl Into<Level>) -> Self {
        Self {
            console_level: console_level.into(),
            logs_dir: None,
        }
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    /// Console directives used when `RUST_LOG` is unset.
    pub fn console_directives(&self) -> String {
        directives(Level::WARN, self.console_level)
    }

    /// Log file path, when a log directory is configured.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.logs_dir.as_deref().map(|dir| dir.join(LOG_FILE_NAME))
    }
}

/// `own` for bilistream and the HTTP trace layer, at most `others` elsewhere.
fn directives(others: Level, own: Level) -> String {
    // More verbose levels compare greater.
    let mut directives = vec![level_name(others.min(own))];
    let own = level_name(own);
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={own}")));
    directives.join(",")
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Installs the global subscriber.
///
/// `RUST_LOG` replaces the console directives when set. The file layer, if
/// configured, always records bilistream at debug.
///
/// # Errors
/// - `io::Error` - Log directory could not be created or the file opened
pub fn init_tracing(settings: &LogSettings) -> io::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.console_directives()));

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_filter(console_filter);

    let file_layer = match settings.log_file() {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_writer(open_log_file(&path)?)
                .with_filter(EnvFilter::new(directives(Level::INFO, Level::DEBUG))),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!(
        console = %settings.console_level,
        log_file = ?settings.log_file(),
        "Logging initialised"
    );
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    File::create(path)
}

/// Console verbosity accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
