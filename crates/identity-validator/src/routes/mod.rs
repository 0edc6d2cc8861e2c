//! HTTP routes.
//!
//! Defines the Axum router and application state.

use crate::auth::{
    ClaimsProjector, Diagnostics, IssueError, IssuerRegistry, MultiIssuerDispatcher,
    RegistryError, TokenIssuer,
};
use crate::config::Config;
use crate::handlers;
use crate::keys::{KeyFetcher, KeyMaterialResolver};
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Lower bound for the request timeout.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom over the worst-case key refresh time.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Failure to assemble application state from configuration.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("development token issuer '{0}' is not registered")]
    UnknownDevTokenIssuer(String),

    #[error(transparent)]
    DevToken(#[from] IssueError),
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<MultiIssuerDispatcher>,
    pub projector: Arc<ClaimsProjector>,
    /// Present only when `DEV_TOKEN_ISSUER` is configured.
    pub token_issuer: Option<Arc<TokenIssuer>>,
}

impl AppState {
    /// Build state with an HTTP key fetcher.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if an issuer policy is invalid or duplicated, or
    /// if the development token issuer cannot be set up.
    pub fn new(config: Config) -> Result<Self, StateError> {
        let registry = Arc::new(IssuerRegistry::from_config(&config.issuers)?);
        let resolver = Arc::new(KeyMaterialResolver::new(
            &registry,
            config.resolver_settings(),
        ));
        Self::assemble(config, registry, resolver)
    }

    /// Build state with a custom key fetcher.
    ///
    /// # Errors
    ///
    /// See [`AppState::new`].
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn KeyFetcher>) -> Result<Self, StateError> {
        let registry = Arc::new(IssuerRegistry::from_config(&config.issuers)?);
        let resolver = Arc::new(KeyMaterialResolver::with_fetcher(
            &registry,
            config.resolver_settings(),
            fetcher,
        ));
        Self::assemble(config, registry, resolver)
    }

    fn assemble(
        config: Config,
        registry: Arc<IssuerRegistry>,
        resolver: Arc<KeyMaterialResolver>,
    ) -> Result<Self, StateError> {
        let token_issuer = match &config.dev_token_issuer {
            Some(name) => {
                let policy = registry
                    .get(name)
                    .ok_or_else(|| StateError::UnknownDevTokenIssuer(name.clone()))?;
                Some(Arc::new(TokenIssuer::for_policy(policy)?))
            }
            None => None,
        };

        let diagnostics = Arc::new(Diagnostics::new(&registry));
        let dispatcher = Arc::new(MultiIssuerDispatcher::new(registry, resolver, diagnostics));

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            projector: Arc::new(ClaimsProjector::new()),
            token_issuer,
        })
    }
}

/// Build the application routes.
///
/// - `/v1/health` - Liveness probe, public
/// - `/metrics` - Prometheus metrics, public
/// - `/v1/diagnostics/issuers` - Per-issuer diagnostics, public and read-only
/// - `/v1/dev/token` - Development token minting, only when configured
/// - `/v1/me` - Current user, requires authentication
/// - `/v1/admin` - Admin data, requires authentication and the `Admin` role
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - Request timeout long enough for every discovery issuer to refresh
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let timeout = request_timeout(state.dispatcher.resolver());
    let auth_state = Arc::new(AuthState {
        dispatcher: state.dispatcher.clone(),
        projector: state.projector.clone(),
    });

    let mut public_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/v1/diagnostics/issuers",
            get(handlers::get_issuer_diagnostics),
        );
    if state.token_issuer.is_some() {
        public_routes = public_routes.route("/v1/dev/token", post(handlers::issue_dev_token));
    }
    let public_routes = public_routes.with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/v1/me", get(handlers::get_me))
        .route("/v1/admin", get(handlers::get_admin))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// A token can fall through every discovery issuer, each refreshing its keys
/// in turn, and must still get its 401 before the request times out.
fn request_timeout(resolver: &KeyMaterialResolver) -> Duration {
    let issuers = u32::try_from(resolver.discovery_issuer_count()).unwrap_or(u32::MAX);
    resolver
        .refresh_budget()
        .saturating_mul(issuers)
        .saturating_add(REQUEST_TIMEOUT_MARGIN)
        .max(MIN_REQUEST_TIMEOUT)
}
