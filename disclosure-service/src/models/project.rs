//! Raw project record and its tier-filtered projections.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::AccessLevel;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportPackage {
    pub name: String,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub title: String,
    pub body: String,
    pub published_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialDocument {
    pub document_id: String,
    pub name: String,
    pub url: String,
}

/// Project as stored by the catalogue, every tier's data included.
///
/// Never serialise this to a viewer; route it through the projector.
#[derive(Debug, Clone, Default, FromRow)]
pub struct ProjectRecord {
    pub project_id: Uuid,
    pub title: String,
    pub public_description: String,
    pub category: String,
    #[sqlx(json)]
    pub media: Vec<MediaItem>,
    pub funding_goal: Decimal,
    pub current_funding: Decimal,
    pub backer_count: i64,
    pub funding_end_utc: Option<DateTime<Utc>>,
    pub creator_display_name: String,

    pub full_description: Option<String>,
    #[sqlx(json)]
    pub support_packages: Vec<SupportPackage>,
    #[sqlx(json)]
    pub team_members: Vec<TeamMember>,
    #[sqlx(json)]
    pub faq: Vec<FaqEntry>,
    #[sqlx(json)]
    pub updates: Vec<ProjectUpdate>,
    pub risk_disclosures: Option<String>,

    pub confidential_description: Option<String>,
    #[sqlx(json)]
    pub confidential_documents: Vec<ConfidentialDocument>,
    pub detailed_financials: Option<serde_json::Value>,
    pub business_plan: Option<String>,
}

/// Fields every viewer may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicProjectView {
    pub project_id: Uuid,
    pub title: String,
    pub public_description: String,
    pub category: String,
    pub media: Vec<MediaItem>,
    pub funding_goal: Decimal,
    pub current_funding: Decimal,
    pub backer_count: i64,
    pub funding_end_utc: Option<DateTime<Utc>>,
    pub creator_display_name: String,
    pub funding_expired: bool,
    pub funding_complete: bool,
}

/// Added for viewers with an active confidentiality agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredProjectView {
    pub full_description: Option<String>,
    pub support_packages: Vec<SupportPackage>,
    pub team_members: Vec<TeamMember>,
    pub faq: Vec<FaqEntry>,
    pub updates: Vec<ProjectUpdate>,
    pub risk_disclosures: Option<String>,
}

/// Added for negotiators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatorProjectView {
    pub confidential_description: Option<String>,
    pub confidential_documents: Vec<ConfidentialDocument>,
    pub detailed_financials: Option<serde_json::Value>,
    pub business_plan: Option<String>,
}

/// The response returned to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAccessData {
    pub access_level: AccessLevel,
    #[serde(flatten)]
    pub public: PublicProjectView,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub registered: Option<RegisteredProjectView>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub negotiator: Option<NegotiatorProjectView>,
}
