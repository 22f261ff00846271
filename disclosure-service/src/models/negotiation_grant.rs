//! Negotiation grant model - deposit-backed full access to a project.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Expired,
    Completed,
}

string_enum!(GrantStatus, "grant status", {
    Active => "active",
    Expired => "expired",
    Completed => "completed",
});

/// Negotiation grant entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NegotiationGrant {
    pub grant_id: Uuid,
    pub project_id: Uuid,
    pub investor_user_id: Uuid,
    pub deposit_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: GrantStatus,
    pub full_access: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl NegotiationGrant {
    /// Only an active grant flagged for full access can contribute to negotiator access.
    pub fn grants_full_access(&self) -> bool {
        self.status == GrantStatus::Active && self.full_access
    }
}
