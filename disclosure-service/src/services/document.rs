//! Durable copy of a signed agreement, attached to the activation confirmation.

use sha2::{Digest, Sha256};

use crate::models::{AgreementScope, ConfidentialityAgreement};
use crate::services::notifier::DocumentAttachment;
use crate::services::ServiceError;

pub trait DocumentGenerator: Send + Sync {
    /// Rendering is pure, so calling it again for the same agreement is safe.
    fn render(&self, agreement: &ConfidentialityAgreement)
        -> Result<DocumentAttachment, ServiceError>;
}

#[derive(Debug, Clone, Default)]
pub struct PlainTextDocumentGenerator;

impl PlainTextDocumentGenerator {
    /// Hex SHA-256 of the signature artefact; the artefact itself stays out of the document.
    pub fn signature_fingerprint(signature_artifact: &str) -> String {
        hex::encode(Sha256::digest(signature_artifact.as_bytes()))
    }
}

impl DocumentGenerator for PlainTextDocumentGenerator {
    fn render(
        &self,
        agreement: &ConfidentialityAgreement,
    ) -> Result<DocumentAttachment, ServiceError> {
        let verified_utc = agreement.verified_utc.ok_or_else(|| {
            ServiceError::Validation("Agreement has not been verified".to_string())
        })?;

        let scope = match (agreement.scope, agreement.project_id) {
            (AgreementScope::Platform, _) => "All projects on the platform".to_string(),
            (AgreementScope::Project, Some(project_id)) => format!("Project {}", project_id),
            (AgreementScope::Project, None) => {
                return Err(ServiceError::Validation(
                    "Project-scoped agreement without a project".to_string(),
                ))
            }
        };

        let mut body = String::new();
        body.push_str("CONFIDENTIALITY AGREEMENT\n");
        body.push_str("=========================\n\n");
        body.push_str(&format!("Agreement ID: {}\n", agreement.agreement_id));
        body.push_str(&format!("Signatory:    {}\n", agreement.subject_user_id));
        body.push_str(&format!("Scope:        {}\n", scope));
        body.push_str(&format!(
            "Signed:       {}\n",
            agreement.created_utc.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        body.push_str(&format!(
            "Verified:     {}\n",
            verified_utc.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        body.push_str(&format!(
            "Signature:    sha256:{}\n",
            Self::signature_fingerprint(&agreement.signature_artifact)
        ));
        if let Some(ip) = &agreement.ip_address {
            body.push_str(&format!("IP address:   {}\n", ip));
        }
        body.push_str("\n-------------------------\n\n");
        body.push_str(&agreement.version_text);
        body.push('\n');

        Ok(DocumentAttachment {
            filename: format!("confidentiality-agreement-{}.txt", agreement.agreement_id),
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.into_bytes(),
        })
    }
}
