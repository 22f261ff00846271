//! Confidentiality agreement model - the signed NDA that unlocks registered access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Whether an agreement covers the whole platform or a single project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementScope {
    Platform,
    Project,
}

string_enum!(AgreementScope, "agreement scope", {
    Platform => "platform",
    Project => "project",
});

/// Agreement lifecycle states. Records are never deleted, only transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    PendingVerification,
    Active,
    /// Replaced by a newer active agreement for the same subject and scope.
    Superseded,
    Revoked,
}

string_enum!(AgreementStatus, "agreement status", {
    PendingVerification => "pending_verification",
    Active => "active",
    Superseded => "superseded",
    Revoked => "revoked",
});

/// Outcome of the post-activation document + confirmation dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

string_enum!(DeliveryStatus, "delivery status", {
    Pending => "pending",
    Delivered => "delivered",
    Failed => "failed",
});

/// Where one-time codes and confirmations are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContactInfo {
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactInfo {
    /// Phone numbers must be E.164 (`+` followed by 8-15 digits).
    pub fn phone_is_valid(&self) -> bool {
        self.phone.as_deref().is_none_or(|phone| {
            let digits = phone.strip_prefix('+').unwrap_or_default();
            (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
        })
    }
}

/// Device/network facts captured when the signature was submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
}

impl SignatureMetadata {
    /// Derive device and browser from the raw user agent.
    pub fn capture(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        let device_type = user_agent.as_deref().map(classify_device).map(str::to_string);
        let browser = user_agent.as_deref().map(classify_browser).map(str::to_string);
        Self {
            ip_address,
            user_agent,
            device_type,
            browser,
        }
    }
}

fn classify_device(user_agent: &str) -> &'static str {
    if user_agent.contains("iPad") || user_agent.contains("Tablet") {
        "tablet"
    } else if user_agent.contains("Mobi")
        || user_agent.contains("iPhone")
        || user_agent.contains("Android")
    {
        "mobile"
    } else {
        "desktop"
    }
}

fn classify_browser(user_agent: &str) -> &'static str {
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
    if user_agent.contains("Edg/") {
        "edge"
    } else if user_agent.contains("OPR/") || user_agent.contains("Opera") {
        "opera"
    } else if user_agent.contains("Firefox/") {
        "firefox"
    } else if user_agent.contains("Chrome/") {
        "chrome"
    } else if user_agent.contains("Safari/") {
        "safari"
    } else {
        "other"
    }
}

/// Administrative revocation stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub actor_id: Uuid,
    pub reason: String,
    pub revoked_utc: DateTime<Utc>,
}

/// Confidentiality agreement entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConfidentialityAgreement {
    pub agreement_id: Uuid,
    pub subject_user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub scope: AgreementScope,
    pub project_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub version_text: String,
    #[serde(skip_serializing, default)]
    pub signature_artifact: String,
    #[sqlx(try_from = "String")]
    pub status: AgreementStatus,
    pub verified: bool,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    #[sqlx(try_from = "String")]
    pub delivery_status: DeliveryStatus,
    pub delivery_error: Option<String>,
    pub revoked_by: Option<Uuid>,
    pub revocation_reason: Option<String>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ConfidentialityAgreement {
    pub fn is_active(&self) -> bool {
        self.status == AgreementStatus::Active
    }

    /// Whether this agreement unlocks the given project.
    pub fn covers_project(&self, project_id: Uuid) -> bool {
        match self.scope {
            AgreementScope::Platform => true,
            AgreementScope::Project => self.project_id == Some(project_id),
        }
    }

    pub fn revocation(&self) -> Option<Revocation> {
        match (self.revoked_by, &self.revocation_reason, self.revoked_utc) {
            (Some(actor_id), Some(reason), Some(revoked_utc)) => Some(Revocation {
                actor_id,
                reason: reason.clone(),
                revoked_utc,
            }),
            _ => None,
        }
    }

    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            email: self.contact_email.clone(),
            phone: self.contact_phone.clone(),
        }
    }
}

/// Input for inserting a pending agreement.
#[derive(Debug, Clone)]
pub struct NewAgreement {
    pub agreement_id: Uuid,
    pub subject_user_id: Uuid,
    pub scope: AgreementScope,
    pub project_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub version_text: String,
    pub signature_artifact: String,
    pub contact: ContactInfo,
    pub metadata: SignatureMetadata,
}

impl NewAgreement {
    /// Materialise the row as the store would return it right after insert.
    pub fn into_agreement(self, now: DateTime<Utc>) -> ConfidentialityAgreement {
        ConfidentialityAgreement {
            agreement_id: self.agreement_id,
            subject_user_id: self.subject_user_id,
            scope: self.scope,
            project_id: self.project_id,
            template_id: self.template_id,
            version_text: self.version_text,
            signature_artifact: self.signature_artifact,
            status: AgreementStatus::PendingVerification,
            verified: false,
            contact_email: self.contact.email,
            contact_phone: self.contact.phone,
            ip_address: self.metadata.ip_address,
            user_agent: self.metadata.user_agent,
            device_type: self.metadata.device_type,
            browser: self.metadata.browser,
            delivery_status: DeliveryStatus::Pending,
            delivery_error: None,
            revoked_by: None,
            revocation_reason: None,
            revoked_utc: None,
            verified_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const EDGE_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";

    #[test]
    fn test_capture_classifies_user_agent() {
        let meta = SignatureMetadata::capture(
            Some("10.0.0.1".to_string()),
            Some(CHROME_DESKTOP.to_string()),
        );
        assert_eq!(meta.device_type.as_deref(), Some("desktop"));
        assert_eq!(meta.browser.as_deref(), Some("chrome"));

        let meta = SignatureMetadata::capture(None, Some(SAFARI_IPHONE.to_string()));
        assert_eq!(meta.device_type.as_deref(), Some("mobile"));
        assert_eq!(meta.browser.as_deref(), Some("safari"));

        let meta = SignatureMetadata::capture(None, Some(EDGE_DESKTOP.to_string()));
        assert_eq!(meta.browser.as_deref(), Some("edge"));
    }

    #[test]
    fn test_capture_without_user_agent() {
        let meta = SignatureMetadata::capture(None, None);
        assert_eq!(meta, SignatureMetadata::default());
    }

    #[test]
    fn test_contact_validation() {
        let valid = ContactInfo {
            email: Some("investor@example.com".to_string()),
            phone: Some("+491701234567".to_string()),
        };
        assert!(valid.validate().is_ok());

        let bad_email = ContactInfo {
            email: Some("not-an-email".to_string()),
            phone: None,
        };
        assert!(bad_email.validate().is_err());

        assert!(valid.phone_is_valid());

        let bad_phone = ContactInfo {
            email: None,
            phone: Some("0170 1234".to_string()),
        };
        assert!(!bad_phone.phone_is_valid());
    }

    #[test]
    fn test_scope_coverage() {
        let project_id = Uuid::new_v4();
        let mut agreement = NewAgreement {
            agreement_id: Uuid::new_v4(),
            subject_user_id: Uuid::new_v4(),
            scope: AgreementScope::Project,
            project_id: Some(project_id),
            template_id: None,
            version_text: "v1".to_string(),
            signature_artifact: "sig".to_string(),
            contact: ContactInfo::default(),
            metadata: SignatureMetadata::default(),
        }
        .into_agreement(Utc::now());

        assert!(agreement.covers_project(project_id));
        assert!(!agreement.covers_project(Uuid::new_v4()));

        agreement.scope = AgreementScope::Platform;
        agreement.project_id = None;
        assert!(agreement.covers_project(Uuid::new_v4()));
    }
}
