//! Download-merge-stream pipeline.
//!
//! Two DASH streams are downloaded concurrently into a private workspace,
//! remuxed into one container by an external tool, and handed to the caller
//! as a [`ManagedStream`] that removes the workspace when released.

pub mod fetcher;
pub mod managed;
pub mod muxer;
pub mod pipeline;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use fetcher::{DualStreamFetcher, FetchHeaders, FetchTarget};
pub use managed::{CleanupGuard, ManagedStream, ReleaseHandle};
pub use muxer::{FfmpegMuxer, MuxOutcome, Muxer};
pub use pipeline::{MergePipeline, MergeRequest, PipelineStage};

/// Which of the two elementary streams an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => f.write_str("video"),
            StreamKind::Audio => f.write_str("audio"),
        }
    }
}

/// Why a single stream download failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-2xx status.
    #[error("server returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The overall download timeout elapsed.
    #[error("download timed out")]
    TimedOut,

    /// Connection, protocol or body read failure.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The destination file could not be written.
    #[error("failed writing {}: {source}", .path.display())]
    Write {
        /// Destination file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::TimedOut
        } else {
            FetchError::Request(error)
        }
    }
}

/// Errors of the download-merge-stream pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    /// One of the two downloads failed; all partial files were removed.
    #[error("Failed to download {stream} stream: {cause}")]
    FetchFailed {
        /// Stream whose download failed.
        stream: StreamKind,
        /// Failure detail.
        #[source]
        cause: FetchError,
    },

    /// The remux tool is not installed or not on the search path.
    #[error("Remux tool not found: {program}")]
    ToolNotFound {
        /// Program that could not be started.
        program: String,
    },

    /// The remux tool exited unsuccessfully.
    #[error("Remux tool failed ({status}): {output}")]
    MuxFailed {
        /// Exit status description.
        status: String,
        /// Combined stdout and stderr of the tool.
        output: String,
    },

    /// The remux tool was killed after exceeding its time bound.
    #[error("Remux tool did not finish within {after:?}")]
    MuxTimedOut {
        /// Configured bound.
        after: Duration,
    },

    /// A temporary artifact could not be removed. Logged, never returned.
    #[error("Failed to clean up {}: {source}", .path.display())]
    Cleanup {
        /// Artifact that survived cleanup.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pipeline was cancelled by the caller.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Workspace I/O failed outside of a download.
    #[error("IO error during {operation}: {source}")]
    Io {
        /// Description of the operation that failed.
        operation: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl MediaError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::FetchFailed { .. } | MediaError::MuxTimedOut { .. } | MediaError::Cancelled
        )
    }
}

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;
