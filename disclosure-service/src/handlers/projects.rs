//! Tiered project reads and confidential document access.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use crate::middleware::{RequestContext, UserId, Viewer};
use crate::models::{AccessLevel, AuditEventType, ConfidentialDocument, ProjectAccessData};
use crate::services::ServiceError;
use crate::AppState;

/// Project view for whoever is asking. Resolution failures degrade to the
/// public view; they are never surfaced as an error.
#[instrument(skip(state, context))]
pub async fn get_project(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    context: RequestContext,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectAccessData>, AppError> {
    let resolution = state.resolver.resolve(viewer, project_id).await;

    let project = state
        .store
        .find_project(project_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Project".to_string()))?;

    let view = state.projector.project(&project, resolution.level);

    state.audit.record(
        project_id,
        viewer,
        resolution.level,
        AuditEventType::View,
        Some("project".to_string()),
        None,
        context.audit(),
    );

    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct DocumentAccessResponse {
    pub access_level: AccessLevel,
    pub document: ConfidentialDocument,
}

/// Hand out a confidential document to a negotiator and audit the download.
#[instrument(skip(state, context))]
pub async fn record_download(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    context: RequestContext,
    Path((project_id, content_id)): Path<(Uuid, String)>,
) -> Result<Json<DocumentAccessResponse>, AppError> {
    let resolution = state.resolver.resolve(Some(user_id), project_id).await;
    if resolution.level < AccessLevel::Negotiator {
        return Err(AppError::Forbidden(
            "Confidential documents require negotiator access".to_string(),
        ));
    }

    let project = state
        .store
        .find_project(project_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Project".to_string()))?;

    let document = project
        .confidential_documents
        .into_iter()
        .find(|d| d.document_id == content_id)
        .ok_or_else(|| ServiceError::NotFound("Document".to_string()))?;

    state.audit.record(
        project_id,
        Some(user_id),
        resolution.level,
        AuditEventType::Download,
        Some("confidential_document".to_string()),
        Some(document.document_id.clone()),
        context.audit(),
    );

    Ok(Json(DocumentAccessResponse {
        access_level: resolution.level,
        document,
    }))
}
