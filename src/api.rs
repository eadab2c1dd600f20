//! Read API: serves persisted delegations and a liveness probe.
//!
//! Ingestion failures do not surface here; the API only returns 5xx when the
//! store itself fails at read time.

use crate::store::Store;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::types::Delegation;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    /// Oldest year accepted by the `year` filter.
    pub min_valid_year: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidYear(String),

    #[error("{0:#}")]
    Store(anyhow::Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidYear(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DelegationsQuery {
    year: Option<String>,
}

#[derive(Debug, Serialize)]
struct DelegationsResponse {
    data: Vec<Delegation>,
}

/// Parses and bounds-checks the optional `year` filter.
fn validate_year(raw: &str, min_valid_year: i32) -> Result<i32, ApiError> {
    let year: i32 = raw
        .parse()
        .map_err(|_| ApiError::InvalidYear("Year must be a valid number".to_owned()))?;

    let current_year = Utc::now().year();
    if year < min_valid_year || year > current_year {
        return Err(ApiError::InvalidYear(format!(
            "Year must be between {min_valid_year} and {current_year}"
        )));
    }

    Ok(year)
}

async fn get_delegations(
    State(state): State<ApiState>,
    Query(params): Query<DelegationsQuery>,
) -> Result<Json<DelegationsResponse>, ApiError> {
    let year = match params.year.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(validate_year(raw, state.min_valid_year)?),
    };

    let data = state
        .store
        .get_delegations(year)
        .await
        .map_err(ApiError::Store)?;

    Ok(Json(DelegationsResponse { data }))
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Builds the API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/xtz/delegations", get(get_delegations))
        .route("/liveness", get(liveness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the API until the token is cancelled.
pub async fn serve(
    state: ApiState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
