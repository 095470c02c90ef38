//! Centralized configuration for bilistream.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all bilistream components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct BilistreamConfig {
    pub upstream: UpstreamConfig,
    pub download: DownloadConfig,
    pub mux: MuxConfig,
    pub server: ServerConfig,
}

/// Upstream video API configuration.
///
/// Controls endpoints, identity headers and the parameters sent when asking
/// for play addresses.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the JSON API
    pub api_base: String,
    /// Base URL of the public video pages, used to build referers
    pub page_base: String,
    /// User agent presented to the API and the CDN
    pub user_agent: String,
    /// Session cookie; several quality tiers require a logged-in session
    pub cookie: Option<String>,
    /// Timeout for metadata API calls
    pub api_timeout: Duration,
    /// Default quality tier (`qn`)
    pub default_quality: u32,
    /// Stream format version (`fnver`)
    pub fnver: u32,
    /// Stream format flags (`fnval`), 4048 requests all DASH variants
    pub fnval: u32,
    /// Whether 4K tiers may be returned (`fourk`)
    pub fourk: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            page_base: "https://www.bilibili.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            cookie: None,
            api_timeout: Duration::from_secs(30),
            default_quality: 80, // 1080P
            fnver: 0,
            fnval: 4048,
            fourk: 1,
        }
    }
}

impl UpstreamConfig {
    /// Referer used when no video page applies.
    pub fn default_referer(&self) -> String {
        format!("{}/", self.page_base.trim_end_matches('/'))
    }
}

/// Media download configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Overall timeout for one stream download, body included
    pub timeout: Duration,
    /// Directory under which per-request workspaces are created (None = OS temp dir)
    pub temp_root: Option<PathBuf>,
    /// Prefix of per-request workspace directories
    pub temp_prefix: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 minutes
            temp_root: None,
            temp_prefix: "bilistream_".to_string(),
        }
    }
}

/// External remux tool configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Program name (searched on PATH) or path of the remux tool
    pub program: PathBuf,
    /// Upper bound on a single remux run (None = no limit)
    pub timeout: Option<Duration>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl BilistreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(cookie) = lookup("BILIBILI_COOKIE") {
            if !cookie.trim().is_empty() {
                config.upstream.cookie = Some(cookie);
            }
        }

        if let Some(host) = lookup("BILISTREAM_HOST") {
            config.server.host = host;
        }

        if let Some(port) = lookup("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        if let Some(program) = lookup("BILISTREAM_FFMPEG") {
            config.mux.program = PathBuf::from(program);
        }

        if let Some(timeout) = lookup("BILISTREAM_MUX_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                // Zero disables the bound
                config.mux.timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
            }
        }

        if let Some(timeout) = lookup("BILISTREAM_DOWNLOAD_TIMEOUT") {
            // Zero would fail every download, so it keeps the default
            if let Ok(seconds @ 1..) = timeout.parse::<u64>() {
                config.download.timeout = Duration::from_secs(seconds);
            }
        }

        if let Some(dir) = lookup("BILISTREAM_TEMP_DIR") {
            config.download.temp_root = Some(PathBuf::from(dir));
        }

        config
    }
}
