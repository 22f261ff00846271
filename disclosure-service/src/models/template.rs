//! Agreement template model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Legal text an agreement snapshots at signing time.
///
/// At most one template is the default at any instant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgreementTemplate {
    pub template_id: Uuid,
    pub name: String,
    pub version_label: String,
    pub body_text: String,
    pub is_default: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl AgreementTemplate {
    /// The text frozen onto an agreement signed against this template.
    pub fn version_text(&self) -> String {
        format!("{} ({})\n\n{}", self.name, self.version_label, self.body_text)
    }
}

/// Input for creating a template.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTemplate {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub version_label: String,
    #[validate(length(min = 1))]
    pub body_text: String,
    #[serde(default)]
    pub make_default: bool,
}
