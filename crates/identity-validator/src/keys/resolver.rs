//! Per-issuer key resolution.
//!
//! Symmetric issuers resolve to a prepared HMAC key. Discovery issuers
//! resolve to a cached [`KeySnapshot`] with these rules:
//!
//! - A fresh snapshot is served as-is.
//! - A fresh snapshot missing the token's `kid` triggers one refresh, at most
//!   once per `min_refresh_interval`. If that refresh fails the existing
//!   snapshot is kept.
//! - A stale or missing snapshot triggers a refresh. If it fails, a stale
//!   snapshot is served for up to `stale_grace` past its expiry.
//! - After a failed refresh, no new refresh starts for `min_refresh_interval`;
//!   callers in that window get the remembered error straight away.
//!
//! Concurrent refreshes for one issuer are coalesced into a single fetch.
//! The fetch runs on its own task, so a caller that gives up does not cancel
//! it for everyone else.

use crate::auth::policy::{IssuerKind, IssuerPolicy};
use crate::auth::registry::IssuerRegistry;
use crate::keys::fetcher::{HttpKeyFetcher, KeyFetcher};
use crate::keys::jwks::KeySnapshot;
use crate::keys::KeyResolutionError;
use crate::observability::metrics::{record_jwks_fetch, record_key_cache_lookup};
use chrono::{DateTime, Utc};
use common::secret::ExposeSecret;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::DecodingKey;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// Attempts per refresh (one initial fetch plus one retry).
const FETCH_ATTEMPTS: u32 = 2;

/// Pause before retrying a failed fetch.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Resolver tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Timeout for each fetch attempt.
    pub http_timeout: Duration,

    /// How long past expiry a stale snapshot may be served on refresh failure.
    pub stale_grace: Duration,

    /// Minimum spacing between unknown-`kid` refreshes, and between a failed
    /// refresh and the next attempt.
    pub min_refresh_interval: Duration,

    /// Reject plain-HTTP authorities and `jwks_uri` values.
    pub require_https_metadata: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            stale_grace: Duration::from_secs(3600),
            min_refresh_interval: Duration::from_secs(30),
            require_https_metadata: true,
        }
    }
}

/// Key material for one validation attempt.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Prepared HMAC key.
    Symmetric(Arc<DecodingKey>),

    /// Current key set of a discovery issuer.
    Asymmetric(Arc<KeySnapshot>),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Symmetric(_) => f.write_str("KeyMaterial::Symmetric([REDACTED])"),
            KeyMaterial::Asymmetric(snapshot) => f
                .debug_tuple("KeyMaterial::Asymmetric")
                .field(snapshot)
                .finish(),
        }
    }
}

/// Freshness of an issuer's key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCacheState {
    /// Symmetric issuer; nothing is fetched.
    Static,
    /// No key set has been fetched yet.
    Empty,
    /// Within TTL.
    Fresh,
    /// Past TTL but still servable on refresh failure.
    Stale,
    /// Past TTL and grace; unusable until refreshed.
    Expired,
}

/// Point-in-time view of an issuer's key cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCacheStatus {
    pub state: KeyCacheState,
    pub key_count: usize,
    pub fetched_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_in_flight: bool,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<KeySnapshot>, KeyResolutionError>>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<RefreshFuture>,
    last_started: Option<Instant>,
    last_failure: Option<(Instant, KeyResolutionError)>,
}

impl RefreshState {
    fn recent_failure(&self, interval: Duration) -> Option<KeyResolutionError> {
        self.last_failure
            .as_ref()
            .filter(|(at, _)| at.elapsed() < interval)
            .map(|(_, e)| e.clone())
    }
}

/// Key cache for one discovery issuer.
struct IssuerKeyCache {
    issuer_name: String,
    authority: String,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    refresh: Mutex<RefreshState>,
}

impl IssuerKeyCache {
    fn new(issuer_name: &str, authority: &str, ttl: Duration) -> Self {
        Self {
            issuer_name: issuer_name.to_string(),
            authority: authority.to_string(),
            ttl,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    async fn resolve(
        self: &Arc<Self>,
        kid: Option<&str>,
        fetcher: &Arc<dyn KeyFetcher>,
        settings: &ResolverSettings,
    ) -> Result<Arc<KeySnapshot>, KeyResolutionError> {
        let current = self.snapshot.read().await.clone();

        if let Some(snapshot) = current.as_ref().filter(|s| s.is_fresh_at(Instant::now())) {
            let Some(kid) = kid.filter(|k| !snapshot.contains_kid(k)) else {
                record_key_cache_lookup(&self.issuer_name, "hit");
                return Ok(Arc::clone(snapshot));
            };

            record_key_cache_lookup(&self.issuer_name, "unknown_kid");
            let Some(refresh) = self.refresh_if_due(fetcher, settings) else {
                tracing::debug!(
                    target: "idv.keys.resolver",
                    issuer_name = %self.issuer_name,
                    kid = %kid,
                    "Unknown kid; refresh suppressed by minimum interval"
                );
                // A refresh may have landed since `current` was read
                let latest = self.snapshot.read().await.clone();
                return Ok(latest.unwrap_or_else(|| Arc::clone(snapshot)));
            };

            return match refresh.await {
                Ok(refreshed) => Ok(refreshed),
                Err(e) => {
                    tracing::warn!(
                        target: "idv.keys.resolver",
                        issuer_name = %self.issuer_name,
                        kid = %kid,
                        error = %e,
                        "Refresh for unknown kid failed; keeping current key set"
                    );
                    Ok(Arc::clone(snapshot))
                }
            };
        }

        record_key_cache_lookup(
            &self.issuer_name,
            if current.is_some() { "stale" } else { "miss" },
        );

        let refreshed = match self.refresh_now(fetcher, settings) {
            Ok(refresh) => refresh.await,
            Err(recent) => {
                tracing::debug!(
                    target: "idv.keys.resolver",
                    issuer_name = %self.issuer_name,
                    error = %recent,
                    "Refresh suppressed after recent failure"
                );
                Err(recent)
            }
        };

        match refreshed {
            Ok(refreshed) => Ok(refreshed),
            Err(e) => match current {
                Some(stale) if stale.is_within_grace_at(Instant::now(), settings.stale_grace) => {
                    tracing::warn!(
                        target: "idv.keys.resolver",
                        issuer_name = %self.issuer_name,
                        error = %e,
                        expired_at = %stale.expires_at_utc(),
                        "Key refresh failed; serving stale key set"
                    );
                    Ok(stale)
                }
                _ => {
                    tracing::error!(
                        target: "idv.keys.resolver",
                        issuer_name = %self.issuer_name,
                        error = %e,
                        "Key refresh failed and no usable key set is cached"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Join the in-flight refresh, or start one.
    ///
    /// Fails with the previous error instead if a refresh failed less than
    /// `min_refresh_interval` ago.
    fn refresh_now(
        self: &Arc<Self>,
        fetcher: &Arc<dyn KeyFetcher>,
        settings: &ResolverSettings,
    ) -> Result<RefreshFuture, KeyResolutionError> {
        let mut state = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = &state.in_flight {
            return Ok(in_flight.clone());
        }
        if let Some(recent) = state.recent_failure(settings.min_refresh_interval) {
            return Err(recent);
        }
        Ok(self.start_refresh(&mut state, fetcher, settings))
    }

    /// Join the in-flight refresh, or start one unless the previous refresh
    /// started less than `min_refresh_interval` ago.
    fn refresh_if_due(
        self: &Arc<Self>,
        fetcher: &Arc<dyn KeyFetcher>,
        settings: &ResolverSettings,
    ) -> Option<RefreshFuture> {
        let mut state = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = &state.in_flight {
            return Some(in_flight.clone());
        }
        if let Some(last) = state.last_started {
            if last.elapsed() < settings.min_refresh_interval {
                return None;
            }
        }
        Some(self.start_refresh(&mut state, fetcher, settings))
    }

    // Caller holds the refresh lock, so the task cannot clear `in_flight`
    // before it is set.
    fn start_refresh(
        self: &Arc<Self>,
        state: &mut RefreshState,
        fetcher: &Arc<dyn KeyFetcher>,
        settings: &ResolverSettings,
    ) -> RefreshFuture {
        let cache = Arc::clone(self);
        let fetcher = Arc::clone(fetcher);
        let timeout = settings.http_timeout;

        let task = tokio::spawn(async move {
            let result = cache.fetch_snapshot(fetcher.as_ref(), timeout).await;
            if let Ok(snapshot) = &result {
                *cache.snapshot.write().await = Some(Arc::clone(snapshot));
            }
            let mut state = cache.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            state.in_flight = None;
            state.last_failure = result.as_ref().err().map(|e| (Instant::now(), e.clone()));
            drop(state);
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(KeyResolutionError::RefreshAborted(e.to_string())))
        }
        .boxed()
        .shared();

        state.in_flight = Some(shared.clone());
        state.last_started = Some(Instant::now());
        shared
    }

    #[instrument(skip_all, target = "idv.keys.resolver", fields(issuer_name = %self.issuer_name))]
    async fn fetch_snapshot(
        &self,
        fetcher: &dyn KeyFetcher,
        timeout: Duration,
    ) -> Result<Arc<KeySnapshot>, KeyResolutionError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(fetcher, timeout).await {
                Ok(snapshot) => {
                    tracing::info!(
                        target: "idv.keys.resolver",
                        issuer_name = %self.issuer_name,
                        key_count = snapshot.len(),
                        attempt = attempt,
                        "Key set refreshed"
                    );
                    return Ok(Arc::new(snapshot));
                }
                Err(e) if attempt < FETCH_ATTEMPTS && is_retryable(&e) => {
                    tracing::warn!(
                        target: "idv.keys.resolver",
                        issuer_name = %self.issuer_name,
                        error = %e,
                        attempt = attempt,
                        "Key fetch failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &self,
        fetcher: &dyn KeyFetcher,
        timeout: Duration,
    ) -> Result<KeySnapshot, KeyResolutionError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, fetcher.fetch_key_set(&self.authority)).await
        {
            Ok(result) => result,
            Err(_) => Err(KeyResolutionError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
        .and_then(|document| {
            let snapshot = KeySnapshot::from_document(&self.issuer_name, document, self.ttl);
            if snapshot.is_empty() {
                Err(KeyResolutionError::NoUsableKeys)
            } else {
                Ok(snapshot)
            }
        });

        let status = match &result {
            Ok(_) => "success",
            Err(KeyResolutionError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        record_jwks_fetch(&self.issuer_name, status, start.elapsed());

        result
    }

    async fn status(&self, stale_grace: Duration) -> KeyCacheStatus {
        let refresh_in_flight = self
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .is_some();

        let Some(snapshot) = self.snapshot.read().await.clone() else {
            return KeyCacheStatus {
                state: KeyCacheState::Empty,
                key_count: 0,
                fetched_at: None,
                expires_at: None,
                refresh_in_flight,
            };
        };

        let now = Instant::now();
        let state = if snapshot.is_fresh_at(now) {
            KeyCacheState::Fresh
        } else if snapshot.is_within_grace_at(now, stale_grace) {
            KeyCacheState::Stale
        } else {
            KeyCacheState::Expired
        };

        KeyCacheStatus {
            state,
            key_count: snapshot.len(),
            fetched_at: Some(snapshot.fetched_at_utc()),
            expires_at: Some(snapshot.expires_at_utc()),
            refresh_in_flight,
        }
    }
}

fn is_retryable(error: &KeyResolutionError) -> bool {
    !matches!(
        error,
        KeyResolutionError::InsecureMetadataUrl(_) | KeyResolutionError::UnknownIssuer(_)
    )
}

/// Resolves verification keys for registered issuers.
pub struct KeyMaterialResolver {
    fetcher: Arc<dyn KeyFetcher>,
    settings: ResolverSettings,
    symmetric: HashMap<String, Arc<DecodingKey>>,
    caches: HashMap<String, Arc<IssuerKeyCache>>,
}

impl KeyMaterialResolver {
    /// Create a resolver that fetches keys over HTTP.
    #[must_use]
    pub fn new(registry: &IssuerRegistry, settings: ResolverSettings) -> Self {
        let fetcher = Arc::new(HttpKeyFetcher::new(
            settings.http_timeout,
            settings.require_https_metadata,
        ));
        Self::with_fetcher(registry, settings, fetcher)
    }

    /// Create a resolver with a custom key fetcher.
    #[must_use]
    pub fn with_fetcher(
        registry: &IssuerRegistry,
        settings: ResolverSettings,
        fetcher: Arc<dyn KeyFetcher>,
    ) -> Self {
        let mut symmetric = HashMap::new();
        let mut caches = HashMap::new();

        for policy in registry.policies() {
            match policy.kind() {
                IssuerKind::Symmetric { secret } => {
                    let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
                    symmetric.insert(policy.name().to_string(), Arc::new(key));
                }
                IssuerKind::OidcDiscovery {
                    authority,
                    jwks_cache_ttl,
                } => {
                    let cache = IssuerKeyCache::new(policy.name(), authority, *jwks_cache_ttl);
                    caches.insert(policy.name().to_string(), Arc::new(cache));
                }
            }
        }

        Self {
            fetcher,
            settings,
            symmetric,
            caches,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Longest a single key refresh can take: every attempt timing out,
    /// plus the pauses between them.
    #[must_use]
    pub fn refresh_budget(&self) -> Duration {
        self.settings.http_timeout * FETCH_ATTEMPTS + RETRY_DELAY * (FETCH_ATTEMPTS - 1)
    }

    /// Number of issuers whose keys are fetched over the network.
    #[must_use]
    pub fn discovery_issuer_count(&self) -> usize {
        self.caches.len()
    }

    /// Key material for validating a token from `policy`.
    ///
    /// `kid` is the token header's key ID, if any; an unknown `kid` may
    /// trigger a refresh of the issuer's key set.
    ///
    /// # Errors
    ///
    /// Returns `KeyResolutionError` if the issuer is not registered, or if
    /// its key set cannot be fetched and no usable cached copy exists.
    pub async fn resolve(
        &self,
        policy: &IssuerPolicy,
        kid: Option<&str>,
    ) -> Result<KeyMaterial, KeyResolutionError> {
        match policy.kind() {
            IssuerKind::Symmetric { .. } => self
                .symmetric
                .get(policy.name())
                .cloned()
                .map(KeyMaterial::Symmetric)
                .ok_or_else(|| KeyResolutionError::UnknownIssuer(policy.name().to_string())),
            IssuerKind::OidcDiscovery { .. } => {
                let cache = self
                    .caches
                    .get(policy.name())
                    .ok_or_else(|| KeyResolutionError::UnknownIssuer(policy.name().to_string()))?;
                cache
                    .resolve(kid, &self.fetcher, &self.settings)
                    .await
                    .map(KeyMaterial::Asymmetric)
            }
        }
    }

    /// Fetch key sets for every discovery issuer.
    ///
    /// Failures are logged and otherwise ignored; the next token for that
    /// issuer retries.
    pub async fn warm_up(&self) {
        let refreshes = self.caches.values().map(|cache| {
            match cache.refresh_now(&self.fetcher, &self.settings) {
                Ok(refresh) => refresh,
                Err(recent) => futures::future::ready(Err(recent)).boxed().shared(),
            }
        });

        for result in futures::future::join_all(refreshes).await {
            if let Err(e) = result {
                tracing::warn!(target: "idv.keys.resolver", error = %e, "Key set warm-up failed");
            }
        }
    }

    /// Cache status for the named issuer.
    pub async fn cache_status(&self, issuer_name: &str) -> Option<KeyCacheStatus> {
        if self.symmetric.contains_key(issuer_name) {
            return Some(KeyCacheStatus {
                state: KeyCacheState::Static,
                key_count: 1,
                fetched_at: None,
                expires_at: None,
                refresh_in_flight: false,
            });
        }

        let cache = self.caches.get(issuer_name)?;
        Some(cache.status(self.settings.stale_grace).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::policy::MIN_JWKS_CACHE_TTL;
    use crate::keys::jwks::JwksDocument;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use common::secret::SecretString;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns queued responses in order, then errors.
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<JwksDocument, KeyResolutionError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<JwksDocument, KeyResolutionError>>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        fn with_delay(
            responses: Vec<Result<JwksDocument, KeyResolutionError>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyFetcher for ScriptedFetcher {
        async fn fetch_key_set(
            &self,
            _authority: &str,
        ) -> Result<JwksDocument, KeyResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(KeyResolutionError::JwksFetch("unavailable".to_string())))
        }
    }

    fn jwks(kids: &[&str]) -> Result<JwksDocument, KeyResolutionError> {
        Ok(JwksDocument {
            keys: kids
                .iter()
                .map(|kid| {
                    json!({
                        "kty": "OKP",
                        "crv": "Ed25519",
                        "kid": kid,
                        "x": URL_SAFE_NO_PAD.encode([9u8; 32])
                    })
                })
                .collect(),
        })
    }

    fn unavailable() -> Result<JwksDocument, KeyResolutionError> {
        Err(KeyResolutionError::JwksFetch("HTTP 503".to_string()))
    }

    fn settings() -> ResolverSettings {
        ResolverSettings {
            http_timeout: Duration::from_secs(5),
            stale_grace: Duration::from_secs(3600),
            min_refresh_interval: Duration::ZERO,
            require_https_metadata: false,
        }
    }

    fn registry() -> IssuerRegistry {
        let mut registry = IssuerRegistry::new();
        registry
            .register(
                IssuerPolicy::symmetric(
                    "LocalAuth",
                    "https://localhost:5001",
                    vec!["api://local".to_string()],
                    SecretString::from("local-secret"),
                )
                .unwrap(),
            )
            .unwrap();
        registry
            .register(
                IssuerPolicy::oidc_discovery(
                    "Entra",
                    "https://login.example/v2.0",
                    vec!["api://app".to_string()],
                    "https://login.example",
                )
                .unwrap()
                .with_jwks_cache_ttl(MIN_JWKS_CACHE_TTL)
                .unwrap(),
            )
            .unwrap();
        registry
    }

    fn resolver_with(
        fetcher: Arc<ScriptedFetcher>,
        settings: ResolverSettings,
    ) -> (KeyMaterialResolver, Arc<IssuerPolicy>) {
        let registry = registry();
        let policy = Arc::clone(registry.get("Entra").unwrap());
        (
            KeyMaterialResolver::with_fetcher(&registry, settings, fetcher),
            policy,
        )
    }

    async fn backdate(resolver: &KeyMaterialResolver, kids: &[&str], age: Duration) {
        let cache = resolver.caches.get("Entra").unwrap();
        let document = jwks(kids).unwrap();
        let fresh = KeySnapshot::from_document("Entra", document, cache.ttl);
        let snapshot = KeySnapshot::fetched_at(
            fresh.keys().to_vec(),
            cache.ttl,
            Instant::now().checked_sub(age).unwrap(),
            Utc::now() - chrono::Duration::from_std(age).unwrap(),
        );
        *cache.snapshot.write().await = Some(Arc::new(snapshot));
    }

    fn snapshot_of(material: KeyMaterial) -> Arc<KeySnapshot> {
        match material {
            KeyMaterial::Asymmetric(snapshot) => snapshot,
            KeyMaterial::Symmetric(_) => Arc::new(KeySnapshot::new(vec![], Duration::ZERO)),
        }
    }

    #[tokio::test]
    async fn test_symmetric_issuer_never_fetches() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let registry = registry();
        let resolver = KeyMaterialResolver::with_fetcher(&registry, settings(), fetcher.clone());

        let policy = registry.get("LocalAuth").unwrap();
        let material = resolver.resolve(policy, None).await.unwrap();
        assert!(matches!(material, KeyMaterial::Symmetric(_)));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_served_from_cache() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1"])]);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        let first = snapshot_of(resolver.resolve(&policy, Some("k1")).await.unwrap());
        let second = snapshot_of(resolver.resolve(&policy, Some("k1")).await.unwrap());

        assert!(first.contains_kid("k1"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_refresh() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1"]), jwks(&["k1", "k2"])]);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        resolver.resolve(&policy, Some("k1")).await.unwrap();
        let rotated = snapshot_of(resolver.resolve(&policy, Some("k2")).await.unwrap());

        assert!(rotated.contains_kid("k2"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_respects_min_interval() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1"]), jwks(&["k1", "k2"])]);
        let mut settings = settings();
        settings.min_refresh_interval = Duration::from_secs(60);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings);

        resolver.resolve(&policy, Some("k1")).await.unwrap();
        let snapshot = snapshot_of(resolver.resolve(&policy, Some("k2")).await.unwrap());

        assert!(!snapshot.contains_kid("k2"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_unknown_kid_refresh_keeps_current_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1"]), unavailable(), unavailable()]);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        resolver.resolve(&policy, Some("k1")).await.unwrap();
        let snapshot = snapshot_of(resolver.resolve(&policy, Some("k9")).await.unwrap());

        assert!(snapshot.contains_kid("k1"));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let fetcher = ScriptedFetcher::with_delay(vec![jwks(&["k1"])], Duration::from_millis(200));
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());
        let resolver = Arc::new(resolver);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let policy = Arc::clone(&policy);
                tokio::spawn(async move { resolver.resolve(&policy, Some("k1")).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_refresh() {
        let fetcher = ScriptedFetcher::with_delay(vec![jwks(&["k1"])], Duration::from_millis(200));
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), resolver.resolve(&policy, Some("k1")))
                .await;
        assert!(abandoned.is_err());

        let snapshot = snapshot_of(resolver.resolve(&policy, Some("k1")).await.unwrap());
        assert!(snapshot.contains_kid("k1"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_first_fetch_failure_is_error() {
        let fetcher = ScriptedFetcher::new(vec![unavailable(), unavailable()]);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        let err = resolver.resolve(&policy, Some("k1")).await.unwrap_err();
        assert_eq!(err, KeyResolutionError::JwksFetch("HTTP 503".to_string()));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_not_repeated_within_interval() {
        let fetcher = ScriptedFetcher::new(vec![unavailable(), unavailable(), jwks(&["k1"])]);
        let mut settings = settings();
        settings.min_refresh_interval = Duration::from_secs(60);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings);

        let first = resolver.resolve(&policy, Some("k1")).await.unwrap_err();
        assert_eq!(fetcher.calls(), 2);

        for _ in 0..5 {
            let again = resolver.resolve(&policy, Some("k1")).await.unwrap_err();
            assert_eq!(again, first);
        }
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            resolver.cache_status("Entra").await.unwrap().state,
            KeyCacheState::Empty
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_retried_after_interval() {
        let fetcher = ScriptedFetcher::new(vec![unavailable(), unavailable(), jwks(&["k1"])]);
        let mut settings = settings();
        settings.min_refresh_interval = Duration::from_millis(50);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings);

        assert!(resolver.resolve(&policy, Some("k1")).await.is_err());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(resolver.resolve(&policy, Some("k1")).await.is_ok());
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_refresh_budget_covers_every_attempt() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let (resolver, _policy) = resolver_with(fetcher, settings());

        assert_eq!(resolver.refresh_budget(), Duration::from_millis(10_200));
        assert_eq!(resolver.discovery_issuer_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_retried_once() {
        let fetcher = ScriptedFetcher::new(vec![unavailable(), jwks(&["k1"])]);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings());

        assert!(resolver.resolve(&policy, Some("k1")).await.is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_key_set_is_error() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&[]), jwks(&[])]);
        let (resolver, policy) = resolver_with(fetcher, settings());

        assert_eq!(
            resolver.resolve(&policy, None).await.unwrap_err(),
            KeyResolutionError::NoUsableKeys
        );
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_within_grace() {
        let fetcher = ScriptedFetcher::new(vec![]);

        let mut settings = settings();
        settings.stale_grace = Duration::from_secs(60);
        let (resolver, policy) = resolver_with(fetcher.clone(), settings);

        // Expired 15s ago, grace is 60s
        let age = MIN_JWKS_CACHE_TTL + Duration::from_secs(15);
        backdate(&resolver, &["old"], age).await;

        let snapshot = snapshot_of(resolver.resolve(&policy, Some("old")).await.unwrap());
        assert!(snapshot.contains_kid("old"));
        assert_eq!(fetcher.calls(), 2);

        let status = resolver.cache_status("Entra").await.unwrap();
        assert_eq!(status.state, KeyCacheState::Stale);
    }

    #[tokio::test]
    async fn test_stale_snapshot_beyond_grace_is_error() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let mut settings = settings();
        settings.stale_grace = Duration::from_secs(60);
        let (resolver, policy) = resolver_with(fetcher, settings);

        let age = MIN_JWKS_CACHE_TTL + Duration::from_secs(75);
        backdate(&resolver, &["old"], age).await;

        assert!(resolver.resolve(&policy, Some("old")).await.is_err());
        let status = resolver.cache_status("Entra").await.unwrap();
        assert_eq!(status.state, KeyCacheState::Expired);
    }

    #[tokio::test]
    async fn test_stale_snapshot_replaced_on_successful_refresh() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["new"])]);
        let (resolver, policy) = resolver_with(fetcher, settings());

        let age = MIN_JWKS_CACHE_TTL + Duration::from_secs(10);
        backdate(&resolver, &["old"], age).await;

        let snapshot = snapshot_of(resolver.resolve(&policy, None).await.unwrap());
        assert!(snapshot.contains_kid("new"));
        assert!(!snapshot.contains_kid("old"));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let fetcher = ScriptedFetcher::with_delay(vec![jwks(&["k1"])], Duration::from_secs(5));
        let mut settings = settings();
        settings.http_timeout = Duration::from_millis(50);
        let (resolver, policy) = resolver_with(fetcher, settings);

        assert!(matches!(
            resolver.resolve(&policy, None).await,
            Err(KeyResolutionError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_status() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1", "k2"])]);
        let (resolver, policy) = resolver_with(fetcher, settings());

        assert_eq!(
            resolver.cache_status("LocalAuth").await.unwrap().state,
            KeyCacheState::Static
        );
        assert_eq!(
            resolver.cache_status("Entra").await.unwrap().state,
            KeyCacheState::Empty
        );
        assert!(resolver.cache_status("Unknown").await.is_none());

        resolver.resolve(&policy, None).await.unwrap();
        let status = resolver.cache_status("Entra").await.unwrap();
        assert_eq!(status.state, KeyCacheState::Fresh);
        assert_eq!(status.key_count, 2);
        assert!(status.fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_warm_up_populates_caches() {
        let fetcher = ScriptedFetcher::new(vec![jwks(&["k1"])]);
        let (resolver, _policy) = resolver_with(fetcher.clone(), settings());

        resolver.warm_up().await;
        assert_eq!(
            resolver.cache_status("Entra").await.unwrap().state,
            KeyCacheState::Fresh
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_policy_is_unknown_issuer() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let (resolver, _policy) = resolver_with(fetcher, settings());
        let other = IssuerPolicy::oidc_discovery(
            "Other",
            "https://other",
            vec!["a".to_string()],
            "https://other",
        )
        .unwrap();

        assert_eq!(
            resolver.resolve(&other, None).await.unwrap_err(),
            KeyResolutionError::UnknownIssuer("Other".to_string())
        );
    }
}
