//! HTTP client for the metadata and play-address endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{ApiEnvelope, NavData, PageInfo, PlayUrlData, VideoId};
use super::ApiError;
use crate::config::UpstreamConfig;
use crate::signing::{
    KeyCacheError, KeySource, MixingKeyPair, ParamValue, RequestSigner, SigningKeyCache,
    extract_key_from_url,
};

const NAV_ENDPOINT: &str = "/x/web-interface/nav";
const PAGELIST_ENDPOINT: &str = "/x/player/pagelist";
const PLAY_URL_ENDPOINT: &str = "/x/player/wbi/playurl";

/// Builds the shared HTTP client for API calls.
///
/// # Errors
/// - `ApiError::Unavailable` - TLS backend could not be initialised
pub fn build_http_client(config: &UpstreamConfig) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(config.api_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ApiError::Unavailable {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Performs a GET and decodes the JSON envelope.
async fn get_envelope<T: DeserializeOwned>(
    http: &reqwest::Client,
    config: &UpstreamConfig,
    url: Url,
    referer: &str,
) -> Result<ApiEnvelope<T>, ApiError> {
    tracing::debug!(%url, "Upstream API request");

    let mut request = http.get(url.clone()).header(reqwest::header::REFERER, referer);
    if let Some(cookie) = &config.cookie {
        request = request.header(reqwest::header::COOKIE, cookie);
    }

    let response = request.send().await.map_err(|e| ApiError::Unavailable {
        reason: format!("request to {} failed: {e}", url.path()),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Unavailable {
            reason: format!("{} returned HTTP {status}", url.path()),
        });
    }

    let body = response.bytes().await.map_err(|e| ApiError::Unavailable {
        reason: format!("failed to read body of {}: {e}", url.path()),
    })?;

    serde_json::from_slice(&body).map_err(|e| ApiError::MalformedResponse {
        reason: format!("{}: {e}", url.path()),
    })
}

fn endpoint_url(config: &UpstreamConfig, endpoint: &str) -> Result<Url, ApiError> {
    let raw = format!("{}{endpoint}", config.api_base.trim_end_matches('/'));
    Url::parse(&raw).map_err(|e| ApiError::Unavailable {
        reason: format!("invalid API URL {raw}: {e}"),
    })
}

/// Key source backed by the navigation endpoint.
#[derive(Debug, Clone)]
pub struct NavKeySource {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl NavKeySource {
    pub fn new(http: reqwest::Client, config: UpstreamConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl KeySource for NavKeySource {
    async fn fetch_keys(&self) -> Result<MixingKeyPair, KeyCacheError> {
        let url = endpoint_url(&self.config, NAV_ENDPOINT).map_err(|e| {
            KeyCacheError::UpstreamUnavailable {
                reason: e.to_string(),
            }
        })?;

        let envelope: ApiEnvelope<NavData> =
            get_envelope(&self.http, &self.config, url, &self.config.default_referer())
                .await
                .map_err(|e| match e {
                    ApiError::MalformedResponse { reason } => {
                        KeyCacheError::MalformedKeyResponse { reason }
                    }
                    other => KeyCacheError::UpstreamUnavailable {
                        reason: other.to_string(),
                    },
                })?;

        // Anonymous sessions get code -101 with the key URLs still present.
        let ApiEnvelope { code, message, data } = envelope;
        let image = match data.and_then(|data| data.wbi_img) {
            Some(image) => image,
            None if code != 0 => {
                return Err(KeyCacheError::UpstreamUnavailable {
                    reason: format!("code={code}, message={message}"),
                });
            }
            None => {
                return Err(KeyCacheError::MalformedKeyResponse {
                    reason: "wbi_img missing".to_string(),
                });
            }
        };

        let img_key = extract_key_from_url(&image.img_url).ok_or_else(|| {
            KeyCacheError::MalformedKeyResponse {
                reason: format!("no key in img_url {:?}", image.img_url),
            }
        })?;
        let sub_key = extract_key_from_url(&image.sub_url).ok_or_else(|| {
            KeyCacheError::MalformedKeyResponse {
                reason: format!("no key in sub_url {:?}", image.sub_url),
            }
        })?;

        tracing::info!("Fetched signing keys");
        Ok(MixingKeyPair::new(img_key, sub_key))
    }
}

/// Client for the page-list and play-address endpoints.
#[derive(Debug, Clone)]
pub struct BiliClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    keys: Arc<SigningKeyCache>,
    signer: RequestSigner,
}

impl BiliClient {
    /// Creates a client whose signing keys come from the navigation endpoint.
    ///
    /// # Errors
    /// - `ApiError::Unavailable` - HTTP client could not be built
    pub fn new(config: UpstreamConfig) -> Result<Self, ApiError> {
        let http = build_http_client(&config)?;
        let source = NavKeySource::new(http.clone(), config.clone());
        let keys = Arc::new(SigningKeyCache::new(Arc::new(source)));
        Ok(Self::with_parts(http, config, keys, RequestSigner::default()))
    }

    /// Creates a client from explicit collaborators.
    pub fn with_parts(
        http: reqwest::Client,
        config: UpstreamConfig,
        keys: Arc<SigningKeyCache>,
        signer: RequestSigner,
    ) -> Self {
        Self {
            http,
            config,
            keys,
            signer,
        }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Signing key cache shared by all play-address calls.
    pub fn key_cache(&self) -> &Arc<SigningKeyCache> {
        &self.keys
    }

    /// Video page of `id`, sent as referer to the API and the CDN.
    pub fn referer_for(&self, id: &VideoId) -> String {
        format!("{}/video/{id}/", self.config.page_base.trim_end_matches('/'))
    }

    /// Looks up the content id of a page of a video.
    ///
    /// # Errors
    /// - `ApiError::Unavailable` - Transport failure or HTTP error status
    /// - `ApiError::MalformedResponse` - Unexpected payload
    /// - `ApiError::Rejected` - Nonzero business code
    /// - `ApiError::PageNotFound` - No entry for `page`
    pub async fn fetch_cid(&self, id: &VideoId, page: u32) -> Result<u64, ApiError> {
        let mut url = endpoint_url(&self.config, PAGELIST_ENDPOINT)?;
        let (name, value) = id.pagelist_param();
        url.query_pairs_mut().append_pair(name, &value);

        let envelope: ApiEnvelope<Vec<PageInfo>> =
            get_envelope(&self.http, &self.config, url, &self.config.default_referer()).await?;

        if envelope.code != 0 {
            return Err(ApiError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }

        let cid = envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .find(|info| info.page == page)
            .map(|info| info.cid)
            .ok_or_else(|| ApiError::PageNotFound {
                video: id.to_string(),
                page,
            })?;

        tracing::debug!(video = %id, page, cid, "Resolved content id");
        Ok(cid)
    }

    /// Requests the DASH track listing for a content id.
    ///
    /// A signature rejection invalidates the cached signing keys before the
    /// error is returned, so the following call signs with fresh keys.
    ///
    /// # Errors
    /// - `ApiError::Keys` - Signing keys unavailable
    /// - `ApiError::Unavailable` - Transport failure or HTTP error status
    /// - `ApiError::MalformedResponse` - Unexpected payload
    /// - `ApiError::Rejected` - Nonzero business code
    pub async fn fetch_play_url(
        &self,
        id: &VideoId,
        cid: u64,
        quality: u32,
    ) -> Result<PlayUrlData, ApiError> {
        let keys = self.keys.resolve().await?;

        let params: [(&str, ParamValue); 6] = [
            id.play_url_param(),
            ("cid", cid.into()),
            ("qn", quality.into()),
            ("fnver", self.config.fnver.into()),
            ("fnval", self.config.fnval.into()),
            ("fourk", self.config.fourk.into()),
        ];
        let signed = self.signer.sign(params, &keys);

        let mut url = endpoint_url(&self.config, PLAY_URL_ENDPOINT)?;
        url.set_query(Some(&signed.to_query_string()));

        let envelope: ApiEnvelope<PlayUrlData> =
            get_envelope(&self.http, &self.config, url, &self.referer_for(id)).await?;

        if envelope.code != 0 {
            let error = ApiError::Rejected {
                code: envelope.code,
                message: envelope.message,
            };
            if error.is_signature_rejection() {
                tracing::warn!(code = envelope.code, "Signature rejected, dropping cached keys");
                self.keys.invalidate();
            }
            return Err(error);
        }

        envelope.data.ok_or_else(|| ApiError::MalformedResponse {
            reason: "play address response without data".to_string(),
        })
    }
}
