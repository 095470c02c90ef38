//! Response shapes of the upstream JSON API.
//!
//! Only the fields this crate consumes are modelled; everything else in the
//! payloads is ignored.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::ApiError;
use crate::media::StreamKind;

/// Common envelope of every API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// `data` of the navigation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NavData {
    pub wbi_img: Option<WbiImage>,
}

/// URLs whose file names carry the two key halves.
#[derive(Debug, Clone, Deserialize)]
pub struct WbiImage {
    #[serde(default)]
    pub img_url: String,
    #[serde(default)]
    pub sub_url: String,
}

/// One entry of the page list.
#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    pub cid: u64,
    pub page: u32,
    #[serde(default)]
    pub part: String,
    #[serde(default)]
    pub duration: u64,
}

/// `data` of the play-address endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayUrlData {
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub format: String,
    pub dash: Option<DashData>,
}

/// DASH track listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashData {
    #[serde(default)]
    pub video: Option<Vec<DashTrack>>,
    #[serde(default)]
    pub audio: Option<Vec<DashTrack>>,
}

/// A single audio or video track with its mirrors.
///
/// The API repeats URL fields in camelCase; only the snake_case copies are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashTrack {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub codecs: String,
}

impl DashTrack {
    /// Primary URL, else the first backup URL.
    pub fn preferred_url(&self) -> Option<&str> {
        if !self.base_url.is_empty() {
            return Some(&self.base_url);
        }
        self.backup_url
            .as_deref()
            .and_then(|backups| backups.first())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

/// Download URLs chosen from a play-address response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrls {
    pub video: String,
    pub audio: String,
}

impl PlayUrlData {
    /// Picks the first video and first audio track and their preferred URLs.
    ///
    /// # Errors
    /// - `ApiError::StreamAbsent` - No usable track or URL for one of the streams
    pub fn stream_urls(&self) -> Result<StreamUrls, ApiError> {
        let dash = self.dash.as_ref().ok_or(ApiError::StreamAbsent {
            stream: StreamKind::Video,
        })?;

        let pick = |tracks: &Option<Vec<DashTrack>>, stream: StreamKind| {
            tracks
                .as_deref()
                .and_then(|tracks| tracks.first())
                .and_then(DashTrack::preferred_url)
                .map(str::to_string)
                .ok_or(ApiError::StreamAbsent { stream })
        };

        Ok(StreamUrls {
            video: pick(&dash.video, StreamKind::Video)?,
            audio: pick(&dash.audio, StreamKind::Audio)?,
        })
    }
}

/// Normalised video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VideoId {
    /// Named id, always stored with a literal `BV` prefix
    Bvid(String),
    /// Numeric id
    Aid(u64),
}

impl VideoId {
    /// Parses `BV…` (any prefix case), `av123`/`AV123` or a bare number.
    ///
    /// # Errors
    /// - `ApiError::InvalidVideoId` - Neither form matches
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let raw = raw.trim();
        let invalid = || ApiError::InvalidVideoId {
            raw: raw.to_string(),
        };

        if let Some(prefix) = raw.get(..2) {
            if prefix.eq_ignore_ascii_case("bv") {
                let rest = &raw[2..];
                if rest.is_empty() || !rest.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                    return Err(invalid());
                }
                return Ok(VideoId::Bvid(format!("BV{rest}")));
            }
        }

        let digits = match raw.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("av") => &raw[2..],
            _ => raw,
        };

        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }

        digits.parse().map(VideoId::Aid).map_err(|_| invalid())
    }

    /// Query parameter naming this id on the page-list endpoint.
    pub(crate) fn pagelist_param(&self) -> (&'static str, String) {
        match self {
            VideoId::Bvid(bvid) => ("bvid", bvid.clone()),
            VideoId::Aid(aid) => ("aid", aid.to_string()),
        }
    }

    /// Parameter naming this id on the play-address endpoint.
    pub(crate) fn play_url_param(&self) -> (&'static str, crate::signing::ParamValue) {
        match self {
            VideoId::Bvid(bvid) => ("bvid", bvid.as_str().into()),
            VideoId::Aid(aid) => ("avid", (*aid).into()),
        }
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoId::Bvid(bvid) => f.write_str(bvid),
            VideoId::Aid(aid) => write!(f, "av{aid}"),
        }
    }
}

impl FromStr for VideoId {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VideoId::parse(s)
    }
}
