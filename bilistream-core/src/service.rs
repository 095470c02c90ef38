//! Video id to merged stream, end to end.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::BilistreamConfig;
use crate::media::fetcher::remove_partial;
use crate::media::{FfmpegMuxer, ManagedStream, MergePipeline, MergeRequest, Muxer};
use crate::upstream::{BiliClient, VideoId};
use crate::{BilistreamError, Result};

/// Resolves stream URLs through the upstream API and merges them.
#[derive(Debug)]
pub struct DownloadService {
    client: BiliClient,
    pipeline: MergePipeline,
}

impl DownloadService {
    /// Builds the API client, the ffmpeg muxer and the pipeline from config.
    ///
    /// # Errors
    /// - `BilistreamError::Api` - API client could not be built
    /// - `BilistreamError::Media` - Download client could not be built
    pub fn from_config(config: &BilistreamConfig) -> Result<Self> {
        let client = BiliClient::new(config.upstream.clone())?;
        let muxer: Arc<dyn Muxer> = Arc::new(FfmpegMuxer::from_config(&config.mux));
        let pipeline = MergePipeline::new(&config.upstream, config.download.clone(), muxer)?;
        Ok(Self::with_parts(client, pipeline))
    }

    pub fn with_parts(client: BiliClient, pipeline: MergePipeline) -> Self {
        Self { client, pipeline }
    }

    pub fn client(&self) -> &BiliClient {
        &self.client
    }

    pub async fn muxer_available(&self) -> bool {
        self.pipeline.muxer().is_available().await
    }

    /// Looks up page `page` of `id` and picks its video and audio URLs.
    ///
    /// `quality` falls back to the configured default tier.
    ///
    /// # Errors
    /// - `BilistreamError::Api` - Key, page-list or play-address lookup failed,
    ///   or a stream has no usable track
    pub async fn resolve_streams(
        &self,
        id: &VideoId,
        page: u32,
        quality: Option<u32>,
    ) -> Result<MergeRequest> {
        let quality = quality.unwrap_or(self.client.config().default_quality);
        let cid = self.client.fetch_cid(id, page).await?;
        let play = self.client.fetch_play_url(id, cid, quality).await?;
        let urls = play.stream_urls()?;

        tracing::info!(video = %id, page, cid, quality, served_quality = play.quality, "Resolved stream URLs");
        Ok(MergeRequest {
            video_url: urls.video,
            audio_url: urls.audio,
            referer: self.client.referer_for(id),
        })
    }

    /// Resolves and merges page `page` of `id`.
    ///
    /// # Errors
    /// - `BilistreamError::Api` - See [`resolve_streams`](Self::resolve_streams)
    /// - `BilistreamError::Media` - Download or remux failed
    pub async fn download(
        &self,
        id: &VideoId,
        page: u32,
        quality: Option<u32>,
    ) -> Result<ManagedStream> {
        let request = self.resolve_streams(id, page, quality).await?;
        Ok(self.pipeline.run(&request).await?)
    }

    /// Like [`download`](Self::download), abandoned when `cancel` fires.
    ///
    /// # Errors
    /// - `BilistreamError::Media` - `MediaError::Cancelled` on cancellation
    /// - Any error of [`download`](Self::download)
    pub async fn download_with_cancellation(
        &self,
        id: &VideoId,
        page: u32,
        quality: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<ManagedStream> {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(crate::media::MediaError::Cancelled.into()),
            resolved = self.resolve_streams(id, page, quality) => resolved?,
        };
        Ok(self.pipeline.run_with_cancellation(&request, cancel).await?)
    }

    /// Downloads into `destination` and releases the workspace.
    ///
    /// Returns the number of bytes written. A partially written destination is
    /// removed on failure.
    ///
    /// # Errors
    /// - `BilistreamError::Io` - Destination could not be written
    /// - Any error of [`download`](Self::download)
    pub async fn download_to(
        &self,
        id: &VideoId,
        page: u32,
        quality: Option<u32>,
        destination: &Path,
    ) -> Result<u64> {
        let mut stream = self.download(id, page, quality).await?;

        let copied = async {
            let mut file = tokio::fs::File::create(destination).await?;
            let written = tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;
        let released = stream.release().await;

        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                remove_partial(destination).await;
                return Err(BilistreamError::Io(e));
            }
        };
        released?;

        tracing::info!(video = %id, bytes = written, path = %destination.display(), "Saved merged video");
        Ok(written)
    }
}
