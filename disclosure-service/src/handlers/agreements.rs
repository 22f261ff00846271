//! Signer-facing agreement endpoints: submit, resend code, verify, lookup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use crate::middleware::{RequestContext, UserId};
use crate::models::{
    AgreementScope, AgreementStatus, ConfidentialityAgreement, ContactChannel, ContactInfo,
};
use crate::services::{DraftRequest, IssuedChallenge, ServiceError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitAgreementRequest {
    pub scope: AgreementScope,
    pub project_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub signature: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub channel: Option<ContactChannel>,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub agreement_id: Uuid,
    pub status: AgreementStatus,
    pub challenge_id: Uuid,
    pub channel: ContactChannel,
    pub expires_utc: DateTime<Utc>,
    pub attempt_limit: i32,
    /// Only populated in development with code exposure enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_code: Option<String>,
}

impl ChallengeResponse {
    fn new(agreement_id: Uuid, status: AgreementStatus, issued: IssuedChallenge) -> Self {
        Self {
            agreement_id,
            status,
            challenge_id: issued.challenge.challenge_id,
            channel: issued.challenge.contact_channel,
            expires_utc: issued.challenge.expires_utc,
            attempt_limit: issued.challenge.attempt_limit,
            dev_code: issued.dev_code,
        }
    }
}

/// Default to every channel the signer gave us.
fn channel_for(
    requested: Option<ContactChannel>,
    contact: &ContactInfo,
) -> Result<ContactChannel, ServiceError> {
    if let Some(channel) = requested {
        return Ok(channel);
    }
    match (&contact.email, &contact.phone) {
        (Some(_), Some(_)) => Ok(ContactChannel::Both),
        (Some(_), None) => Ok(ContactChannel::Email),
        (None, Some(_)) => Ok(ContactChannel::Sms),
        (None, None) => Err(ServiceError::Validation(
            "An email address or phone number is required".to_string(),
        )),
    }
}

#[instrument(skip(state, context, req))]
pub async fn submit_agreement(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    context: RequestContext,
    Json(req): Json<SubmitAgreementRequest>,
) -> Result<(StatusCode, Json<ChallengeResponse>), AppError> {
    let contact = ContactInfo {
        email: req.email,
        phone: req.phone,
    };
    let channel = channel_for(req.channel, &contact)?;

    let draft = DraftRequest {
        subject_user_id: user_id,
        scope: req.scope,
        project_id: req.project_id,
        template_id: req.template_id,
        signature_artifact: req.signature,
        contact,
        metadata: context.signature_metadata(),
    };

    let pending = state.agreements.submit_signature(draft, channel).await?;
    let response = ChallengeResponse::new(
        pending.agreement.agreement_id,
        pending.agreement.status,
        pending.issued,
    );
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResendChallengeRequest {
    pub channel: Option<ContactChannel>,
}

#[instrument(skip(state, req))]
pub async fn resend_challenge(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(agreement_id): Path<Uuid>,
    req: Option<Json<ResendChallengeRequest>>,
) -> Result<Json<ChallengeResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let agreement = state
        .store
        .find_agreement(agreement_id)
        .await?
        .filter(|a| a.subject_user_id == user_id)
        .ok_or_else(|| ServiceError::NotFound("Agreement".to_string()))?;
    let channel = channel_for(req.channel, &agreement.contact())?;

    let issued = state
        .agreements
        .resend_challenge(agreement_id, user_id, channel)
        .await?;
    Ok(Json(ChallengeResponse::new(
        agreement_id,
        agreement.status,
        issued,
    )))
}

#[derive(Debug, Deserialize)]
pub struct VerifyAgreementRequest {
    pub challenge_id: Option<Uuid>,
    pub code: String,
}

#[instrument(skip(state, req))]
pub async fn verify_agreement(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(agreement_id): Path<Uuid>,
    Json(req): Json<VerifyAgreementRequest>,
) -> Result<Json<ConfidentialityAgreement>, AppError> {
    let agreement = state
        .agreements
        .confirm_signature(agreement_id, user_id, req.challenge_id, &req.code)
        .await?;
    Ok(Json(agreement))
}

#[derive(Debug, Deserialize)]
pub struct ActiveAgreementQuery {
    pub scope: Option<AgreementScope>,
    pub project_id: Option<Uuid>,
}

/// The caller's active agreement for a scope, platform-wide by default.
pub async fn get_active_agreement(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ActiveAgreementQuery>,
) -> Result<Json<ConfidentialityAgreement>, AppError> {
    let scope = query.scope.unwrap_or(if query.project_id.is_some() {
        AgreementScope::Project
    } else {
        AgreementScope::Platform
    });

    let agreement = state
        .agreements
        .get_active_agreement(user_id, scope, query.project_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Active agreement".to_string()))?;
    Ok(Json(agreement))
}
