//! Bilistream Core - signed upstream API access and the download-merge pipeline
//!
//! This crate provides the request-signing scheme with its key cache, the
//! client for the upstream video API, and the pipeline that downloads a video
//! and an audio stream, remuxes them and hands the result out as a stream
//! that cleans up after itself.

pub mod config;
pub mod media;
pub mod service;
pub mod signing;
pub mod tracing_setup;
pub mod upstream;

// Re-export main types for convenient access
pub use config::BilistreamConfig;
pub use media::{ManagedStream, MediaError, MergePipeline, MergeRequest, StreamKind};
pub use service::DownloadService;
pub use signing::{KeyCacheError, MixingKeyPair, RequestSigner, SigningKeyCache};
pub use upstream::{ApiError, BiliClient, VideoId};

/// Errors that can bubble up from any Bilistream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BilistreamError {
    #[error("Upstream error: {0}")]
    Api(#[from] ApiError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KeyCacheError> for BilistreamError {
    fn from(error: KeyCacheError) -> Self {
        BilistreamError::Api(ApiError::Keys(error))
    }
}

impl BilistreamError {
    /// Name of the stage that failed, for structured error reports.
    pub fn stage(&self) -> &'static str {
        match self {
            BilistreamError::Api(e) => match e {
                ApiError::Keys(_) => "signing",
                ApiError::InvalidVideoId { .. } => "input",
                ApiError::StreamAbsent { .. } => "select",
                _ => "metadata",
            },
            BilistreamError::Media(e) => match e {
                MediaError::FetchFailed { .. } => "fetch",
                MediaError::ToolNotFound { .. }
                | MediaError::MuxFailed { .. }
                | MediaError::MuxTimedOut { .. } => "mux",
                MediaError::Cancelled => "cancelled",
                _ => "stream",
            },
            BilistreamError::Configuration { .. } => "config",
            BilistreamError::Io(_) => "output",
        }
    }

    /// Whether the caller may retry the same request.
    ///
    /// Nothing inside this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            BilistreamError::Api(e) => match e {
                ApiError::Unavailable { .. } => true,
                ApiError::Keys(KeyCacheError::UpstreamUnavailable { .. }) => true,
                other => other.is_signature_rejection(),
            },
            BilistreamError::Media(e) => e.is_retryable(),
            BilistreamError::Configuration { .. } | BilistreamError::Io(_) => false,
        }
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            BilistreamError::Api(e) => match e {
                ApiError::InvalidVideoId { raw } => format!("Invalid video id: {raw}"),
                ApiError::PageNotFound { video, page } => {
                    format!("Page {page} of {video} does not exist")
                }
                ApiError::StreamAbsent { stream } => {
                    format!("No {stream} stream available for this video")
                }
                ApiError::Rejected { code, message } => {
                    format!("Upstream refused the request ({code}): {message}")
                }
                ApiError::Keys(_) => "Could not obtain signing keys".to_string(),
                _ => "Upstream API is unavailable".to_string(),
            },
            BilistreamError::Media(e) => match e {
                MediaError::FetchFailed { stream, .. } => {
                    format!("Failed to download the {stream} stream")
                }
                MediaError::ToolNotFound { program } => {
                    format!("Remux tool {program} is not installed")
                }
                MediaError::MuxFailed { .. } | MediaError::MuxTimedOut { .. } => {
                    "Failed to merge video and audio".to_string()
                }
                MediaError::Cancelled => "Download was cancelled".to_string(),
                _ => "Streaming error occurred".to_string(),
            },
            BilistreamError::Configuration { reason } => format!("Configuration error: {reason}"),
            BilistreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BilistreamError::Api(ApiError::InvalidVideoId { .. } | ApiError::PageNotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, BilistreamError>;
