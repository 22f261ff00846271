//! Operator endpoints. Every route here sits behind the admin API key.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use crate::middleware::UserId;
use crate::models::{
    AgreementStatistics, AgreementTemplate, ConfidentialityAgreement, CreateTemplate,
};
use crate::AppState;

const DEFAULT_UNDELIVERED_LIMIT: i64 = 50;
const MAX_UNDELIVERED_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
}

#[instrument(skip(state, req))]
pub async fn revoke_agreement(
    State(state): State<AppState>,
    UserId(admin_id): UserId,
    Path(agreement_id): Path<Uuid>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<ConfidentialityAgreement>, AppError> {
    let agreement = state
        .agreements
        .revoke(agreement_id, admin_id, &req.reason)
        .await?;
    Ok(Json(agreement))
}

#[instrument(skip(state))]
pub async fn resend_confirmation(
    State(state): State<AppState>,
    Path(agreement_id): Path<Uuid>,
) -> Result<Json<ConfidentialityAgreement>, AppError> {
    Ok(Json(state.agreements.resend_confirmation(agreement_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UndeliveredQuery {
    pub limit: Option<i64>,
}

pub async fn list_undelivered(
    State(state): State<AppState>,
    Query(query): Query<UndeliveredQuery>,
) -> Result<Json<Vec<ConfidentialityAgreement>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_UNDELIVERED_LIMIT)
        .clamp(1, MAX_UNDELIVERED_LIMIT);
    Ok(Json(state.agreements.list_undelivered(limit).await?))
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgreementTemplate>>, AppError> {
    Ok(Json(state.agreements.list_templates().await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(input): Json<CreateTemplate>,
) -> Result<(StatusCode, Json<AgreementTemplate>), AppError> {
    let template = state.agreements.create_template(input).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn set_default_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<AgreementTemplate>, AppError> {
    Ok(Json(state.agreements.set_default_template(template_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// Only count agreements created within the last N days.
    pub days: Option<i64>,
}

pub async fn agreement_statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<AgreementStatistics>, AppError> {
    let since = match query.days {
        Some(days) if days > 0 => Some(
            Duration::try_days(days)
                .and_then(|window| Utc::now().checked_sub_signed(window))
                .ok_or_else(|| AppError::Unprocessable("days is out of range".to_string()))?,
        ),
        Some(_) => {
            return Err(AppError::Unprocessable(
                "days must be a positive number".to_string(),
            ))
        }
        None => None,
    };
    Ok(Json(state.agreements.statistics(since).await?))
}
