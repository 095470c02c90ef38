//! Download and health endpoints.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bilistream_core::{BilistreamError, VideoId};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;

use super::error::WebError;
use crate::server::AppState;

/// Query string of the download endpoint.
///
/// Values are taken as text so malformed numbers get the JSON error body.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// 1-based page index, default 1
    pub p: Option<String>,
    /// Quality tier (`qn`), default from configuration
    pub quality: Option<String>,
}

impl DownloadQuery {
    fn page(&self) -> Result<u32, WebError> {
        parse_positive("p", self.p.as_deref()).map(|page| page.unwrap_or(1))
    }

    fn quality(&self) -> Result<Option<u32>, WebError> {
        parse_positive("quality", self.quality.as_deref())
    }
}

fn parse_positive(name: &str, raw: Option<&str>) -> Result<Option<u32>, WebError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u32>() {
        Ok(value) if value >= 1 => Ok(Some(value)),
        _ => Err(WebError::InvalidInput {
            reason: format!("{name} must be a positive integer, got {raw:?}"),
        }),
    }
}

/// `GET /bilibili/download/health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let muxer = state.service.muxer_available().await;
    Json(json!({ "status": "ok", "muxer": muxer }))
}

/// `GET /bilibili/download/{id}?p=&quality=`
///
/// Streams the merged file as an attachment. The workspace is released when
/// the body has been sent or the client goes away.
///
/// # Errors
/// - `WebError::InvalidInput` - Bad page or quality parameter
/// - `WebError::Core` - Id parsing, lookup, download or remux failed
pub async fn download_video(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, WebError> {
    let page = query.page()?;
    let quality = query.quality()?;
    let id = VideoId::parse(&raw_id).map_err(BilistreamError::from)?;

    tracing::info!(video = %id, page, ?quality, "Download requested");
    let stream = state.service.download(&id, page, quality).await?;
    let content_length = stream.content_length();

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{id}.mp4\""))
        .map_err(|e| WebError::InvalidInput {
            reason: format!("unusable video id for file name: {e}"),
        })?;

    let mut response = Body::from_stream(ReaderStream::new(stream)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}
