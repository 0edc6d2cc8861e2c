//! Issuer diagnostics handler.
//!
//! Read-only. Reports counters and key-cache state per issuer; contains no
//! secrets, subjects or tokens.

use crate::auth::DiagnosticsReport;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/diagnostics/issuers
#[instrument(skip_all, name = "idv.handlers.diagnostics")]
pub async fn get_issuer_diagnostics(State(state): State<Arc<AppState>>) -> Json<DiagnosticsReport> {
    let dispatcher = &state.dispatcher;
    let report = dispatcher
        .diagnostics()
        .report(dispatcher.registry(), dispatcher.resolver())
        .await;
    Json(report)
}
