//! Identity Validator
//!
//! HTTP service that authenticates bearer tokens against the configured
//! issuers.

use anyhow::Context;
use identity_validator::config::Config;
use identity_validator::observability::metrics::init_metrics_recorder;
use identity_validator::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.observability.init_tracing();

    info!(
        bind_address = %config.bind_address,
        issuers = config.issuers.len(),
        require_https_metadata = config.require_https_metadata,
        dev_token_issuer = ?config.dev_token_issuer,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder()
        .map_err(anyhow::Error::msg)
        .context("Failed to initialize metrics")?;

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config).context("Failed to build issuer registry")?);

    for policy in state.dispatcher.registry().policies() {
        info!(
            issuer = %policy.name(),
            issuer_type = %policy.issuer_type(),
            audiences = policy.audiences().len(),
            "Registered issuer"
        );
    }

    // Failures are logged; keys are fetched again on first use
    state.dispatcher.resolver().warm_up().await;

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{bind_address}'"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Identity Validator listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Identity Validator shutdown complete");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
