//! Domain models for disclosure-service.

use thiserror::Error;

/// A stored code that does not name any known variant of a status enum.
#[derive(Debug, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// String-coded enum stored as `varchar` and exchanged as snake_case JSON.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $code:literal),+ $(,)? }) => {
        impl $name {
            /// Get string representation for database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::models::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value).ok_or_else(|| $crate::models::UnknownVariant::new($kind, value))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value).ok_or_else(|| $crate::models::UnknownVariant::new($kind, value))
            }
        }
    };
}

mod access_level;
mod agreement;
mod audit_record;
mod challenge;
mod negotiation_grant;
mod project;
mod statistics;
mod template;

pub use access_level::AccessLevel;
pub use agreement::{
    AgreementScope, AgreementStatus, ConfidentialityAgreement, ContactInfo,
    DeliveryStatus, NewAgreement, Revocation, SignatureMetadata,
};
pub use audit_record::{AccessAuditRecord, AuditContext, AuditEventType, NewAuditRecord};
pub use challenge::{
    ChallengePurpose, ChallengeStatus, ContactChannel, NewChallenge, VerificationChallenge,
};
pub use negotiation_grant::{GrantStatus, NegotiationGrant};
pub use project::{
    ConfidentialDocument, FaqEntry, MediaItem, NegotiatorProjectView, ProjectAccessData,
    ProjectRecord, ProjectUpdate, PublicProjectView, RegisteredProjectView, SupportPackage,
    TeamMember,
};
pub use statistics::AgreementStatistics;
pub use template::{AgreementTemplate, CreateTemplate};
