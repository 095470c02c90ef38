//! Process-wide cache of the upstream signing keys.
//!
//! Keys rotate rarely, so they are fetched once and served from memory until a
//! caller invalidates them (typically after the upstream rejected a signature).
//! Concurrent first use shares one in-flight fetch: every caller waiting on it
//! sees the same key pair or the same failure.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;

use super::MixingKeyPair;

/// Image extension appended to the published key URLs.
const KEY_URL_SUFFIX: &str = ".png";

/// Errors resolving the signing keys.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyCacheError {
    /// The key source could not be reached or answered with a failure status.
    #[error("Signing key source unavailable: {reason}")]
    UpstreamUnavailable {
        /// Transport or status detail.
        reason: String,
    },

    /// The key source answered but the keys could not be extracted.
    #[error("Malformed signing key response: {reason}")]
    MalformedKeyResponse {
        /// What was missing or unreadable.
        reason: String,
    },
}

/// External collaborator that publishes the two key halves.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetches the current key pair.
    ///
    /// # Errors
    /// - `KeyCacheError::UpstreamUnavailable` - Request failed or returned a failure status
    /// - `KeyCacheError::MalformedKeyResponse` - Keys missing from the response
    async fn fetch_keys(&self) -> Result<MixingKeyPair, KeyCacheError>;
}

type KeyFetch = Shared<BoxFuture<'static, Result<MixingKeyPair, KeyCacheError>>>;

/// Single-flight cache over a [`KeySource`].
///
/// The slot is either empty, holds an in-flight fetch, or holds a completed
/// successful fetch. Failed fetches are never retained.
pub struct SigningKeyCache {
    source: Arc<dyn KeySource>,
    slot: Mutex<Option<KeyFetch>>,
}

impl std::fmt::Debug for SigningKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyCache")
            .field("populated", &self.is_populated())
            .finish()
    }
}

impl SigningKeyCache {
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached key pair, fetching it on first use.
    ///
    /// # Errors
    /// - `KeyCacheError::UpstreamUnavailable` - Key source unreachable
    /// - `KeyCacheError::MalformedKeyResponse` - Key source response unusable
    pub async fn resolve(&self) -> Result<MixingKeyPair, KeyCacheError> {
        let fetch = {
            let mut slot = self.slot.lock();
            let current = slot
                .as_ref()
                .map(|fetch| (fetch.clone(), fetch.peek().cloned()));
            match current {
                Some((_, Some(Ok(keys)))) => {
                    tracing::trace!("Signing keys served from cache");
                    return Ok(keys);
                }
                Some((fetch, None)) => {
                    tracing::debug!("Joining in-flight signing key fetch");
                    fetch
                }
                Some((_, Some(Err(_)))) | None => {
                    tracing::debug!("Fetching signing keys");
                    let source = Arc::clone(&self.source);
                    let fetch = async move { source.fetch_keys().await }.boxed().shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Signing key fetch failed");
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&fetch)) {
                *slot = None;
            }
        }

        result
    }

    /// Discards any cached or in-flight keys; the next `resolve` fetches again.
    pub fn invalidate(&self) {
        if self.slot.lock().take().is_some() {
            tracing::info!("Signing keys invalidated");
        }
    }

    /// Whether a successfully fetched key pair is cached.
    pub fn is_populated(&self) -> bool {
        matches!(
            self.slot.lock().as_ref().and_then(|fetch| fetch.peek()),
            Some(Ok(_))
        )
    }
}

/// Extracts a key half from its published URL.
///
/// The key is the final path segment without the image extension, e.g.
/// `https://i0.hdslb.com/bfs/wbi/7cd0…077c.png` yields `7cd0…077c`.
pub fn extract_key_from_url(url: &str) -> Option<String> {
    let segment = url.rsplit('/').next()?;
    let key = segment.strip_suffix(KEY_URL_SUFFIX).unwrap_or(segment);
    (!key.is_empty()).then(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Key source that counts fetches and answers from a script.
    struct ScriptedKeySource {
        calls: AtomicUsize,
        delay: Duration,
        failures_before_success: usize,
    }

    impl ScriptedKeySource {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                failures_before_success: 0,
            }
        }

        fn failing_first(mut self, failures: usize) -> Self {
            self.failures_before_success = failures;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySource for ScriptedKeySource {
        async fn fetch_keys(&self) -> Result<MixingKeyPair, KeyCacheError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures_before_success {
                return Err(KeyCacheError::UpstreamUnavailable {
                    reason: format!("attempt {call} refused"),
                });
            }
            Ok(MixingKeyPair::new(format!("img{call}"), format!("sub{call}")))
        }
    }

    #[tokio::test]
    async fn test_resolve_caches_after_first_fetch() {
        let source = Arc::new(ScriptedKeySource::new(Duration::ZERO));
        let cache = SigningKeyCache::new(source.clone());
        assert!(!cache.is_populated());

        let first = cache.resolve().await.unwrap();
        let second = cache.resolve().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert!(cache.is_populated());
    }

    #[tokio::test]
    async fn test_concurrent_resolve_triggers_single_fetch() {
        let source = Arc::new(ScriptedKeySource::new(Duration::from_millis(50)));
        let cache = Arc::new(SigningKeyCache::new(source.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.resolve().await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let expected = MixingKeyPair::new("img0", "sub0");
        for result in results {
            assert_eq!(result.unwrap().unwrap(), expected);
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_failure_and_failure_is_not_cached() {
        let source = Arc::new(ScriptedKeySource::new(Duration::from_millis(50)).failing_first(1));
        let cache = Arc::new(SigningKeyCache::new(source.clone()));

        let (a, b) = tokio::join!(cache.resolve(), cache.resolve());
        assert_eq!(a, b);
        assert!(matches!(a, Err(KeyCacheError::UpstreamUnavailable { .. })));
        assert_eq!(source.calls(), 1);
        assert!(!cache.is_populated());

        let keys = cache.resolve().await.unwrap();
        assert_eq!(keys, MixingKeyPair::new("img1", "sub1"));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = Arc::new(ScriptedKeySource::new(Duration::ZERO));
        let cache = SigningKeyCache::new(source.clone());

        let before = cache.resolve().await.unwrap();
        cache.invalidate();
        assert!(!cache.is_populated());
        assert_eq!(source.calls(), 1, "invalidate must not fetch by itself");

        let after = cache.resolve().await.unwrap();
        assert_ne!(before, after);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_extract_key_from_url() {
        assert_eq!(
            extract_key_from_url(
                "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"
            )
            .as_deref(),
            Some("7cd084941338484aae1ad9425b84077c")
        );
        assert_eq!(extract_key_from_url("plainkey").as_deref(), Some("plainkey"));
        assert_eq!(extract_key_from_url("https://i0.hdslb.com/bfs/wbi/"), None);
        assert_eq!(extract_key_from_url(""), None);
        assert_eq!(extract_key_from_url("https://i0.hdslb.com/.png"), None);
    }
}
