//! Canonical parameter signing for the play-address API.
//!
//! A signed request carries every caller parameter plus a `wts` timestamp and
//! a `w_rid` signature. The signature is the lowercase hex MD5 of the
//! canonical query (keys ascending, values sanitized and percent-encoded)
//! followed by the raw mixing key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::MixingKeyPair;

/// Name of the synthetic timestamp field.
pub const TIMESTAMP_FIELD: &str = "wts";

/// Name of the synthetic signature field.
pub const SIGNATURE_FIELD: &str = "w_rid";

/// Characters the upstream strips from values before hashing.
const FILTERED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

/// Scalar request parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    UInt(u64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::UInt(value) => write!(f, "{value}"),
            ParamValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::UInt(value.into())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::UInt(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

/// Source of the current Unix time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since the Unix epoch.
    fn unix_seconds(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Clock frozen at a given instant, for reproducible signatures.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn unix_seconds(&self) -> u64 {
        self.0
    }
}

/// Parameter set produced by [`RequestSigner::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedParams {
    /// Caller parameters plus `wts`, as given (unsanitized)
    fields: BTreeMap<String, String>,
    /// Encoded string the signature was computed over, without the mixing key
    canonical: String,
    signature: String,
}

impl SignedParams {
    /// Value of a field; `w_rid` resolves to the signature.
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == SIGNATURE_FIELD {
            return Some(&self.signature);
        }
        self.fields.get(key).map(String::as_str)
    }

    /// Hex-encoded MD5 signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Timestamp injected before signing.
    pub fn timestamp(&self) -> Option<u64> {
        self.fields.get(TIMESTAMP_FIELD)?.parse().ok()
    }

    /// Fields in ascending key order, with the signature last.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .chain(std::iter::once((SIGNATURE_FIELD, self.signature.as_str())))
    }

    /// Query string to send upstream: the signed canonical form plus `w_rid`.
    pub fn to_query_string(&self) -> String {
        format!("{}&{SIGNATURE_FIELD}={}", self.canonical, self.signature)
    }
}

/// Signs parameter sets with a mixing key derived from a [`MixingKeyPair`].
#[derive(Debug, Clone)]
pub struct RequestSigner {
    clock: Arc<dyn Clock>,
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RequestSigner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Signs `params` with the mixing key of `keys`.
    ///
    /// A caller-supplied `wts` is replaced by the current timestamp.
    pub fn sign<I, K, V>(&self, params: I, keys: &MixingKeyPair) -> SignedParams
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let mixing_key = keys.mixing_key();

        let mut fields: BTreeMap<String, String> = params
            .into_iter()
            .map(|(key, value)| (key.into(), value.into().to_string()))
            .collect();
        fields.insert(
            TIMESTAMP_FIELD.to_string(),
            self.clock.unix_seconds().to_string(),
        );

        let canonical = canonical_query(&fields);
        let digest = md5::compute(format!("{canonical}{mixing_key}").as_bytes());
        let signature = hex::encode(digest.0);

        tracing::trace!(%canonical, %signature, "Signed request parameters");

        SignedParams {
            fields,
            canonical,
            signature,
        }
    }
}

/// Removes `! ' ( ) *` from a value and nothing else.
pub fn sanitize_value(value: &str) -> String {
    value.chars().filter(|ch| !FILTERED_CHARS.contains(ch)).collect()
}

/// Percent-encodes sanitized fields as `key=value` pairs joined by `&`.
///
/// Iteration order of the map is byte-wise ascending by key.
pub fn canonical_query(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&sanitize_value(value))
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
