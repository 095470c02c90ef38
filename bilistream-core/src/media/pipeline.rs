//! Fetch, remux and hand off as one cancellable operation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::fetcher::{DualStreamFetcher, FetchHeaders, FetchTarget};
use super::managed::{CleanupGuard, ManagedStream};
use super::muxer::Muxer;
use super::{MediaError, MediaResult};
use crate::config::{DownloadConfig, UpstreamConfig};

const VIDEO_FILE: &str = "video.mp4";
const AUDIO_FILE: &str = "audio.m4a";
const OUTPUT_FILE: &str = "output.mp4";

/// Lifecycle of one pipeline run, used in log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Fetching,
    FetchFailed,
    Muxing,
    MuxFailed,
    Ready,
    Streaming,
    Closed,
}

/// Resolved stream URLs for one merge.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub video_url: String,
    pub audio_url: String,
    /// Page sent as referer to the CDN
    pub referer: String,
}

/// Runs downloads and the remux inside a private temporary workspace.
pub struct MergePipeline {
    fetcher: DualStreamFetcher,
    muxer: Arc<dyn Muxer>,
    download: DownloadConfig,
    user_agent: String,
    cookie: Option<String>,
}

impl std::fmt::Debug for MergePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergePipeline")
            .field("download", &self.download)
            .field("user_agent", &self.user_agent)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl MergePipeline {
    /// Creates a pipeline sending the upstream identity and session.
    ///
    /// # Errors
    /// - `MediaError::Io` - Download client could not be built
    pub fn new(
        upstream: &UpstreamConfig,
        download: DownloadConfig,
        muxer: Arc<dyn Muxer>,
    ) -> MediaResult<Self> {
        let fetcher = DualStreamFetcher::new(&download)?;
        Ok(Self {
            fetcher,
            muxer,
            download,
            user_agent: upstream.user_agent.clone(),
            cookie: upstream.cookie.clone(),
        })
    }

    pub fn muxer(&self) -> &Arc<dyn Muxer> {
        &self.muxer
    }

    /// Downloads both streams, remuxes them and opens the result.
    ///
    /// On failure every file created by this run is removed before the error
    /// is returned. On success the intermediates are already gone and the
    /// returned stream owns the rest of the workspace.
    ///
    /// # Errors
    /// - `MediaError::FetchFailed` - A download failed
    /// - `MediaError::ToolNotFound` - Remux tool not installed
    /// - `MediaError::MuxFailed` - Remux tool exited unsuccessfully
    /// - `MediaError::MuxTimedOut` - Remux tool exceeded its time bound
    /// - `MediaError::Io` - Workspace could not be created or output opened
    pub async fn run(&self, request: &MergeRequest) -> MediaResult<ManagedStream> {
        tracing::debug!(stage = ?PipelineStage::Idle, "Preparing workspace");
        let workspace = self.create_workspace()?;
        let root = workspace.path().to_path_buf();

        let video = root.join(VIDEO_FILE);
        let audio = root.join(AUDIO_FILE);
        let output = root.join(OUTPUT_FILE);
        let guard = Arc::new(CleanupGuard::new(
            workspace,
            output.clone(),
            vec![video.clone(), audio.clone()],
        ));

        let headers = FetchHeaders {
            user_agent: self.user_agent.clone(),
            referer: request.referer.clone(),
            cookie: self.cookie.clone(),
        };

        tracing::info!(stage = ?PipelineStage::Fetching, workspace = %root.display(), "Downloading streams");
        let fetched = self
            .fetcher
            .fetch_both(
                &FetchTarget::new(&request.video_url, &video),
                &FetchTarget::new(&request.audio_url, &audio),
                &headers,
            )
            .await;
        if let Err(e) = fetched {
            tracing::warn!(stage = ?PipelineStage::FetchFailed, error = %e, "Download stage failed");
            guard.release_async().await;
            return Err(e);
        }

        tracing::info!(stage = ?PipelineStage::Muxing, "Merging streams");
        if let Err(e) = self.muxer.mux(&video, &audio, &output).await {
            tracing::warn!(stage = ?PipelineStage::MuxFailed, error = %e, "Merge stage failed");
            guard.release_async().await;
            return Err(e);
        }

        guard.discard_intermediates_async().await;
        tracing::debug!(stage = ?PipelineStage::Ready, output = %output.display(), "Merged file ready");

        let stream = match ManagedStream::open(Arc::clone(&guard)).await {
            Ok(stream) => stream,
            Err(source) => {
                guard.release_async().await;
                return Err(MediaError::Io {
                    operation: format!("open merged file {}", output.display()),
                    source,
                });
            }
        };

        tracing::info!(
            stage = ?PipelineStage::Streaming,
            content_length = ?stream.content_length(),
            "Handing off merged stream"
        );
        Ok(stream)
    }

    /// Like [`run`](Self::run), abandoning the run when `cancel` fires.
    ///
    /// Abandoning drops the in-flight downloads or remux, which kills the
    /// tool and releases the workspace.
    ///
    /// # Errors
    /// - `MediaError::Cancelled` - Token fired before the run finished
    /// - Any error of [`run`](Self::run)
    pub async fn run_with_cancellation(
        &self,
        request: &MergeRequest,
        cancel: &CancellationToken,
    ) -> MediaResult<ManagedStream> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Merge cancelled");
                Err(MediaError::Cancelled)
            }
            result = self.run(request) => result,
        }
    }

    fn create_workspace(&self) -> MediaResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.download.temp_prefix);
        let created = match &self.download.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        created.map_err(|source| MediaError::Io {
            operation: format!("create workspace in {}", self.temp_root().display()),
            source,
        })
    }

    fn temp_root(&self) -> PathBuf {
        self.download
            .temp_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::media::muxer::MuxOutcome;
    use crate::media::{FetchError, StreamKind};

    /// Muxer that must never run.
    struct UnreachableMuxer;

    #[async_trait]
    impl Muxer for UnreachableMuxer {
        async fn mux(&self, _: &Path, _: &Path, _: &Path) -> MediaResult<MuxOutcome> {
            panic!("muxer invoked");
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn pipeline(temp_root: &Path, muxer: Arc<dyn Muxer>) -> MergePipeline {
        let download = DownloadConfig {
            timeout: Duration::from_secs(5),
            temp_root: Some(temp_root.to_path_buf()),
            ..DownloadConfig::default()
        };
        MergePipeline::new(&UpstreamConfig::default(), download, muxer).unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_unreachable_urls_clean_up() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(root.path(), Arc::new(UnreachableMuxer));

        // Port 9 on loopback refuses connections.
        let request = MergeRequest {
            video_url: "http://127.0.0.1:9/video.m4s".to_string(),
            audio_url: "http://127.0.0.1:9/audio.m4s".to_string(),
            referer: "https://www.bilibili.com/".to_string(),
        };

        match pipeline.run(&request).await {
            Err(MediaError::FetchFailed { stream, cause }) => {
                assert_eq!(stream, StreamKind::Video);
                assert!(matches!(cause, FetchError::Request(_)));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_reports_video_first() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(root.path(), Arc::new(UnreachableMuxer));

        let request = MergeRequest {
            video_url: "not a url".to_string(),
            audio_url: "also not a url".to_string(),
            referer: String::new(),
        };

        assert!(matches!(
            pipeline.run(&request).await,
            Err(MediaError::FetchFailed {
                stream: StreamKind::Video,
                ..
            })
        ));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(root.path(), Arc::new(UnreachableMuxer));
        let request = MergeRequest {
            video_url: "http://127.0.0.1:9/v".to_string(),
            audio_url: "http://127.0.0.1:9/a".to_string(),
            referer: String::new(),
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            pipeline.run_with_cancellation(&request, &cancel).await,
            Err(MediaError::Cancelled)
        ));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_workspace_root() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root.path().join("absent"), Arc::new(UnreachableMuxer));
        let request = MergeRequest {
            video_url: "http://127.0.0.1:9/v".to_string(),
            audio_url: "http://127.0.0.1:9/a".to_string(),
            referer: String::new(),
        };

        assert!(matches!(
            pipeline.run(&request).await,
            Err(MediaError::Io { .. })
        ));
    }
}
