//! Request signing for the upstream play-address API.
//!
//! The upstream publishes two rotating key halves. [`SigningKeyCache`] fetches
//! and caches them, [`mixer::mixing_key`] scrambles them into a 32-character
//! salt, and [`RequestSigner`] turns arbitrary parameters into a signed,
//! canonically ordered query.

pub mod key_cache;
pub mod mixer;
pub mod signer;

pub use key_cache::{KeyCacheError, KeySource, SigningKeyCache, extract_key_from_url};
pub use mixer::{MIXIN_KEY_ENC_TAB, mixing_key};
pub use signer::{
    Clock, FixedClock, ParamValue, RequestSigner, SIGNATURE_FIELD, SignedParams, SystemClock,
    TIMESTAMP_FIELD,
};

/// The two opaque key halves published by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixingKeyPair {
    pub img_key: String,
    pub sub_key: String,
}

impl MixingKeyPair {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
        }
    }

    /// Derived mixing key; recomputed on every call.
    pub fn mixing_key(&self) -> String {
        mixing_key(&self.img_key, &self.sub_key)
    }
}
