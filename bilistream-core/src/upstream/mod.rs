//! Client for the upstream video API.
//!
//! Covers the three endpoints the download pipeline depends on: the
//! navigation endpoint publishing the signing keys, the page list mapping a
//! video to its content ids, and the signed play-address endpoint listing the
//! DASH tracks.

pub mod client;
pub mod types;

use thiserror::Error;

pub use client::{BiliClient, NavKeySource};
pub use types::{
    ApiEnvelope, DashData, DashTrack, NavData, PageInfo, PlayUrlData, StreamUrls, VideoId,
    WbiImage,
};

use crate::media::StreamKind;
use crate::signing::KeyCacheError;

/// Upstream codes meaning the signature or session was refused.
pub const SIGNATURE_REJECTED_CODES: [i64; 2] = [-352, -403];

/// Errors talking to the upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure or non-success HTTP status.
    #[error("Upstream API unavailable: {reason}")]
    Unavailable {
        /// Transport or status detail.
        reason: String,
    },

    /// Response body did not have the expected shape.
    #[error("Malformed upstream response: {reason}")]
    MalformedResponse {
        /// Parse failure detail.
        reason: String,
    },

    /// The API answered with a nonzero business code.
    #[error("Upstream rejected request: code={code}, message={message}")]
    Rejected {
        /// Business code from the response envelope.
        code: i64,
        /// Message from the response envelope.
        message: String,
    },

    /// The requested page does not exist for this video.
    #[error("Page {page} not found for {video}")]
    PageNotFound {
        /// Video the lookup was made for.
        video: String,
        /// Requested 1-based page index.
        page: u32,
    },

    /// The play-address response lacks a usable track for a stream.
    #[error("No usable {stream} stream in play address response")]
    StreamAbsent {
        /// Which stream is missing.
        stream: StreamKind,
    },

    /// The identifier is neither a named nor a numeric video id.
    #[error("Invalid video id: {raw:?}")]
    InvalidVideoId {
        /// Identifier as received.
        raw: String,
    },

    /// Signing keys could not be resolved.
    #[error(transparent)]
    Keys(#[from] KeyCacheError),
}

impl ApiError {
    /// Whether the upstream refused the signature or session.
    pub fn is_signature_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { code, .. } if SIGNATURE_REJECTED_CODES.contains(code))
    }
}
