//! Access audit record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::AccessLevel;

/// Audited interaction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    View,
    Download,
    Share,
}

string_enum!(AuditEventType, "audit event type", {
    View => "view",
    Download => "download",
    Share => "share",
});

/// Request-level context attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// One audited access to project content.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessAuditRecord {
    pub audit_id: Uuid,
    pub project_id: Uuid,
    pub subject_user_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub resolved_level: AccessLevel,
    #[sqlx(try_from = "String")]
    pub event_type: AuditEventType,
    pub content_type: Option<String>,
    pub content_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording an access event.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub project_id: Uuid,
    pub subject_user_id: Option<Uuid>,
    pub resolved_level: AccessLevel,
    pub event_type: AuditEventType,
    pub content_type: Option<String>,
    pub content_id: Option<String>,
    pub context: AuditContext,
}

impl NewAuditRecord {
    pub fn into_record(self, audit_id: Uuid, now: DateTime<Utc>) -> AccessAuditRecord {
        AccessAuditRecord {
            audit_id,
            project_id: self.project_id,
            subject_user_id: self.subject_user_id,
            resolved_level: self.resolved_level,
            event_type: self.event_type,
            content_type: self.content_type,
            content_id: self.content_id,
            ip_address: self.context.ip_address,
            user_agent: self.context.user_agent,
            request_id: self.context.request_id,
            created_utc: now,
        }
    }
}
