//! Endpoint handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use grantd_core::decimal::Money;
use grantd_core::{BapReport, BatLossEvent, GrantError, PromotionType};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::sigverify::verify_wallet_signature;
use crate::types::*;
use crate::{ApiError, AppState};

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))
}

fn parse_amount(raw: &str) -> Result<Money, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid amount: {raw}")))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut body = String::new();
    prometheus_client::encoding::text::encode(&mut body, &state.registry)
        .map_err(|e| ApiError::Grant(GrantError::Other(e.to_string())))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

// ── Promotions ───────────────────────────────────────────────────────────────

pub async fn create_promotion(
    State(state): State<AppState>,
    Json(req): Json<CreatePromotionRequest>,
) -> Result<Json<PromotionView>, ApiError> {
    let value = parse_amount(&req.value)?;
    let promotion = state.service.create_promotion(
        req.kind,
        req.num_grants,
        value,
        req.suggestions_per_grant,
        req.platform,
        req.expires_at,
    )?;
    if req.active {
        state.service.activate_promotion(&promotion.id)?;
    }
    Ok(Json(PromotionView::from_promotion(&promotion, req.active)))
}

pub async fn list_promotions(
    State(state): State<AppState>,
    Query(query): Query<ListPromotionsQuery>,
) -> Result<Json<PromotionsResponse>, ApiError> {
    let wallet_id = query
        .payment_id
        .ok_or_else(|| ApiError::BadRequest("paymentId is required".into()))?;
    let platform = query.platform.unwrap_or_default();
    let migrate = query.migrate.as_deref() == Some("true");
    let promotions = state
        .service
        .available_promotions(wallet_id, &platform, migrate)?;
    Ok(Json(PromotionsResponse {
        promotions: promotions
            .iter()
            .map(|p| PromotionView::from_promotion(p, true))
            .collect(),
    }))
}

// ── Claims ───────────────────────────────────────────────────────────────────

pub async fn claim_promotion(
    State(state): State<AppState>,
    Path(promotion_id): Path<Uuid>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClaimResponse>, ApiError> {
    let req: ClaimRequest = parse_body(&body)?;
    verify_wallet_signature(
        &state.service,
        Some(req.payment_id),
        "POST",
        uri.path(),
        &headers,
        &body,
    )?;
    let claim_id = state
        .service
        .claim_promotion_for_wallet(promotion_id.into(), req.payment_id, req.blinded_creds)
        .await?;
    Ok(Json(ClaimResponse { claim_id }))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path((promotion_id, claim_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    match state
        .service
        .signed_creds_for_claim(promotion_id.into(), claim_id.into())?
    {
        Some(view) => Ok(Json(ClaimCredsResponse {
            signed_creds: view.signed_creds,
            batch_proof: view.batch_proof,
            public_key: view.public_key,
        })
        .into_response()),
        // Signing has not come around yet.
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

pub async fn grants_summary(
    State(state): State<AppState>,
    Path(claim_type): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let kind: PromotionType = claim_type
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;
    let summary = state.service.wallet_summary(query.payment_id, kind)?;
    Ok(Json(match summary {
        Some(s) => SummaryResponse {
            kind,
            amount: s.amount.to_string(),
            last_claim: Some(s.last_claim),
        },
        None => SummaryResponse {
            kind,
            amount: "0".into(),
            last_claim: None,
        },
    }))
}

// ── Suggestions and drains ───────────────────────────────────────────────────

pub async fn make_suggestion(
    State(state): State<AppState>,
    Json(req): Json<SuggestionRequest>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let id = state
        .service
        .make_suggestion(&req.credentials, req.suggestion_text)?;
    Ok(Json(SuggestionResponse { id }))
}

pub async fn drain(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DrainResponse>, ApiError> {
    let req: DrainRequest = parse_body(&body)?;
    verify_wallet_signature(
        &state.service,
        Some(req.payment_id),
        "POST",
        uri.path(),
        &headers,
        &body,
    )?;
    let batch_id = state.service.drain(&req.credentials, req.payment_id).await?;
    Ok(Json(DrainResponse {
        drain_id: batch_id.to_string(),
    }))
}

pub async fn drain_retry(
    State(state): State<AppState>,
    Json(req): Json<DrainRetryRequest>,
) -> Result<Json<DrainRetryResponse>, ApiError> {
    let updated = state.service.make_drains_retriable(req.payment_id)?;
    Ok(Json(DrainRetryResponse { updated }))
}

// ── Audit writes ─────────────────────────────────────────────────────────────

pub async fn report_bap(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req: BapReportRequest = parse_body(&body)?;
    // The reporting wallet is whoever signed the request.
    let wallet_id =
        verify_wallet_signature(&state.service, None, "POST", uri.path(), &headers, &body)?;
    state.service.store.insert_bap_report(&BapReport {
        wallet_id,
        amount: parse_amount(&req.amount)?,
        reported_at: Utc::now(),
    })?;
    Ok(Json(serde_json::json!({})))
}

pub async fn report_bat_loss(
    State(state): State<AppState>,
    Path((wallet_id, report_id)): Path<(Uuid, u64)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req: BatLossRequest = parse_body(&body)?;
    verify_wallet_signature(
        &state.service,
        Some(wallet_id.into()),
        "POST",
        uri.path(),
        &headers,
        &body,
    )?;
    state.service.store.insert_bat_loss_event(&BatLossEvent {
        wallet_id: wallet_id.into(),
        report_id,
        amount: parse_amount(&req.amount)?,
        platform: req.platform,
        reported_at: Utc::now(),
    })?;
    Ok(Json(serde_json::json!({})))
}

pub async fn report_clobbered_claims(
    State(state): State<AppState>,
    Json(req): Json<ClobberedClaimsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.store.insert_clobbered_claims(&req.claim_ids)?;
    Ok(Json(serde_json::json!({})))
}
