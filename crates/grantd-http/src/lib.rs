//! grantd-http
//!
//! The REST surface. Thin handlers over [`grantd_engine::Service`] plus the
//! request-signature check for wallet-mutating endpoints; every business
//! outcome is translated into the tightest HTTP status available.

pub mod handlers;
pub mod sigverify;
pub mod types;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use grantd_core::GrantError;
use grantd_engine::Service;
use prometheus_client::registry::Registry;
use tower_http::cors::{Any, CorsLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub registry: Arc<Registry>,
}

/// Build the service router with permissive CORS headers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/promotion",
            post(handlers::create_promotion).get(handlers::list_promotions),
        )
        .route("/promotion/:promotion_id", post(handlers::claim_promotion))
        .route(
            "/promotion/:promotion_id/claims/:claim_id",
            get(handlers::get_claim),
        )
        .route("/:claim_type/grants/summary", get(handlers::grants_summary))
        .route("/suggestion", post(handlers::make_suggestion))
        .route("/suggestion/drain", post(handlers::drain))
        .route("/drain/retry", post(handlers::drain_retry))
        .route("/report-bap", post(handlers::report_bap))
        .route(
            "/:wallet_id/events/batloss/:report_id",
            post(handlers::report_bat_loss),
        )
        .route("/reportclobberedclaims", post(handlers::report_clobbered_claims))
        .layer(cors)
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Grant(GrantError),
    Unauthorized(String),
    BadRequest(String),
}

impl From<GrantError> for ApiError {
    fn from(e: GrantError) -> Self {
        ApiError::Grant(e)
    }
}

fn grant_status(e: &GrantError) -> StatusCode {
    use GrantError::*;
    match e {
        PromotionNotFound | ClaimNotFound | WalletNotFound(_) | WalletLookup(_) => {
            StatusCode::NOT_FOUND
        }
        PromotionGone => StatusCode::GONE,
        BlindedCredsMismatch | DuplicateReport | ClaimAlreadyExists => StatusCode::CONFLICT,
        PromotionDisabled
        | InvalidBlindedCount { .. }
        | NoGrantsLeft
        | MissingPreRegisteredClaim
        | UnsupportedPlatform(_)
        | UnsupportedDepositProvider(_)
        | WalletNotLinked
        | InvalidSuggestionCount
        | InvalidSuggestionAmount
        | UnknownIssuer(_) => StatusCode::BAD_REQUEST,
        NotReputable | WalletNotReputable | WalletDrainLimitExceeded => StatusCode::FORBIDDEN,
        EventBackpressure => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Grant(e) => {
                let status = grant_status(&e);
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    // Internal detail stays in the logs.
                    tracing::error!(error = %e, "internal error");
                    "internal server error".to_string()
                } else {
                    e.to_string()
                };
                (status, message)
            }
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
