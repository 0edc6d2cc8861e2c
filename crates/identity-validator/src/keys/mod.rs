//! Verification key material for configured issuers.
//!
//! - `jwks` - JWKS / discovery wire formats and conversion to verification keys
//! - `fetcher` - HTTP retrieval of discovery documents and key sets
//! - `resolver` - Per-issuer key caching, refresh coalescing and stale fallback

pub mod fetcher;
pub mod jwks;
pub mod resolver;

pub use fetcher::{HttpKeyFetcher, KeyFetcher};
pub use jwks::{KeyFamily, KeySnapshot, VerificationKey};
pub use resolver::{
    KeyCacheState, KeyCacheStatus, KeyMaterial, KeyMaterialResolver, ResolverSettings,
};

use thiserror::Error;

/// Failure to obtain verification keys for an issuer.
///
/// Cloneable so a single refresh result can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyResolutionError {
    /// The issuer is not known to the resolver.
    #[error("no key source registered for issuer '{0}'")]
    UnknownIssuer(String),

    /// Metadata URL is plain HTTP while HTTPS is required.
    #[error("refusing non-HTTPS metadata URL: {0}")]
    InsecureMetadataUrl(String),

    /// The discovery document could not be fetched or parsed.
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// The JWKS document could not be fetched or parsed.
    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),

    /// The key set contained no usable signing keys.
    #[error("JWKS contained no usable signing keys")]
    NoUsableKeys,

    /// A fetch attempt exceeded the configured timeout.
    #[error("key fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The background refresh task ended without producing a result.
    #[error("key refresh aborted: {0}")]
    RefreshAborted(String),
}
