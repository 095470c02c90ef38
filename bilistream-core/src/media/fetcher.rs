//! Concurrent download of the video and audio streams.

use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{FetchError, MediaError, MediaResult, StreamKind};
use crate::config::DownloadConfig;

/// Headers shared by both downloads.
#[derive(Debug, Clone)]
pub struct FetchHeaders {
    /// Client identity string
    pub user_agent: String,
    /// Referring page
    pub referer: String,
    /// Session cookie, when configured
    pub cookie: Option<String>,
}

/// One URL and where its body goes.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub url: String,
    pub destination: PathBuf,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
        }
    }
}

/// Downloads two streams in parallel and reports them as one outcome.
#[derive(Debug, Clone)]
pub struct DualStreamFetcher {
    http: reqwest::Client,
}

impl DualStreamFetcher {
    /// Creates a fetcher whose requests are bounded by the download timeout.
    ///
    /// # Errors
    /// - `MediaError::Io` - HTTP client could not be initialised
    pub fn new(config: &DownloadConfig) -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MediaError::Io {
                operation: "build download client".to_string(),
                source: io::Error::other(e),
            })?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Downloads both targets concurrently.
    ///
    /// Both downloads always run to completion before the outcome is decided.
    /// If either failed, both destination files are removed and the failure
    /// is reported; a video failure takes precedence when both failed.
    ///
    /// # Errors
    /// - `MediaError::FetchFailed` - A download failed, tagged with its stream
    pub async fn fetch_both(
        &self,
        video: &FetchTarget,
        audio: &FetchTarget,
        headers: &FetchHeaders,
    ) -> MediaResult<()> {
        let (video_result, audio_result) = tokio::join!(
            self.fetch_one(StreamKind::Video, video, headers),
            self.fetch_one(StreamKind::Audio, audio, headers),
        );

        let failure = match (video_result, audio_result) {
            (Ok(_), Ok(_)) => return Ok(()),
            (Err(video_err), Ok(_)) => (StreamKind::Video, video_err),
            (Ok(_), Err(audio_err)) => (StreamKind::Audio, audio_err),
            (Err(video_err), Err(audio_err)) => {
                tracing::warn!(error = %audio_err, "Audio download also failed");
                (StreamKind::Video, video_err)
            }
        };

        remove_partial(&video.destination).await;
        remove_partial(&audio.destination).await;

        let (stream, cause) = failure;
        Err(MediaError::FetchFailed { stream, cause })
    }

    async fn fetch_one(
        &self,
        stream: StreamKind,
        target: &FetchTarget,
        headers: &FetchHeaders,
    ) -> Result<u64, FetchError> {
        tracing::debug!(%stream, url = %target.url, "Starting download");

        match self.download_to_file(target, headers).await {
            Ok(bytes) => {
                tracing::info!(
                    %stream,
                    bytes,
                    path = %target.destination.display(),
                    "Download finished"
                );
                Ok(bytes)
            }
            Err(e) => {
                tracing::warn!(%stream, url = %target.url, error = %e, "Download failed");
                remove_partial(&target.destination).await;
                Err(e)
            }
        }
    }

    async fn download_to_file(
        &self,
        target: &FetchTarget,
        headers: &FetchHeaders,
    ) -> Result<u64, FetchError> {
        let mut request = self
            .http
            .get(&target.url)
            .header(reqwest::header::USER_AGENT, &headers.user_agent)
            .header(reqwest::header::REFERER, &headers.referer)
            // Byte-exact bodies; the CDN must not compress.
            .header(reqwest::header::ACCEPT_ENCODING, "identity");
        if let Some(cookie) = &headers.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let write_error = |source| FetchError::Write {
            path: target.destination.clone(),
            source,
        };

        let mut file = fs::File::create(&target.destination)
            .await
            .map_err(write_error)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok(written)
    }
}

/// Removes a partially written file, ignoring files that never existed.
pub(crate) async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            let error = MediaError::Cleanup {
                path: path.to_path_buf(),
                source,
            };
            tracing::warn!(error = %error, "Cleanup failed");
        }
    }
}
