//! Confidentiality agreement lifecycle.
//!
//! `pending_verification -> active -> {superseded | revoked}`. Agreements are
//! never deleted. Activation is the only path to `active` and runs only after
//! a challenge for the agreement verified; the confirmation document and
//! message that follow are best-effort and never undo it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AgreementScope, AgreementStatistics, AgreementStatus, AgreementTemplate, ConfidentialityAgreement,
    ContactChannel, ContactInfo, CreateTemplate, DeliveryStatus, NewAgreement, SignatureMetadata,
};
use crate::services::document::DocumentGenerator;
use crate::services::metrics::{record_active_agreement_anomaly, record_agreement_transition};
use crate::services::notifier::{NotificationDispatcher, NotificationPayload, Recipients};
use crate::services::verification::{IssuedChallenge, VerificationChallengeService};
use crate::services::{DisclosureStore, ServiceError};

/// Everything a signer submits with their signature.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub subject_user_id: Uuid,
    pub scope: AgreementScope,
    pub project_id: Option<Uuid>,
    /// Falls back to the current default template.
    pub template_id: Option<Uuid>,
    pub signature_artifact: String,
    pub contact: ContactInfo,
    pub metadata: SignatureMetadata,
}

/// A freshly created agreement together with the challenge that will activate it.
#[derive(Clone)]
pub struct PendingSignature {
    pub agreement: ConfidentialityAgreement,
    pub issued: IssuedChallenge,
}

#[derive(Clone)]
pub struct ConfidentialityAgreementManager {
    store: Arc<dyn DisclosureStore>,
    verification: VerificationChallengeService,
    dispatcher: Arc<dyn NotificationDispatcher>,
    documents: Arc<dyn DocumentGenerator>,
    compliance_cc: Option<String>,
}

impl ConfidentialityAgreementManager {
    pub fn new(
        store: Arc<dyn DisclosureStore>,
        verification: VerificationChallengeService,
        dispatcher: Arc<dyn NotificationDispatcher>,
        documents: Arc<dyn DocumentGenerator>,
        compliance_cc: Option<String>,
    ) -> Self {
        Self {
            store,
            verification,
            dispatcher,
            documents,
            compliance_cc,
        }
    }

    pub fn verification(&self) -> &VerificationChallengeService {
        &self.verification
    }

    /// Validate the submission, snapshot the template text and store a
    /// pending agreement. Nothing is written when validation fails.
    #[instrument(skip(self, draft), fields(subject_user_id = %draft.subject_user_id, scope = %draft.scope))]
    pub async fn create_draft(
        &self,
        draft: DraftRequest,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        if draft.signature_artifact.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Signature must not be empty".to_string(),
            ));
        }

        match (draft.scope, draft.project_id) {
            (AgreementScope::Project, None) => {
                return Err(ServiceError::Validation(
                    "Project-scoped agreements need a project".to_string(),
                ))
            }
            (AgreementScope::Platform, Some(_)) => {
                return Err(ServiceError::Validation(
                    "Platform agreements cannot name a project".to_string(),
                ))
            }
            _ => {}
        }

        draft
            .contact
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        if !draft.contact.phone_is_valid() {
            return Err(ServiceError::Validation(
                "Phone number must be in E.164 format".to_string(),
            ));
        }
        if draft.contact.email.is_none() && draft.contact.phone.is_none() {
            return Err(ServiceError::Validation(
                "An email address or phone number is required".to_string(),
            ));
        }

        let template = self.resolve_template(draft.template_id).await?;

        let agreement = self
            .store
            .insert_agreement(NewAgreement {
                agreement_id: Uuid::new_v4(),
                subject_user_id: draft.subject_user_id,
                scope: draft.scope,
                project_id: draft.project_id,
                template_id: Some(template.template_id),
                version_text: template.version_text(),
                signature_artifact: draft.signature_artifact,
                contact: draft.contact,
                metadata: draft.metadata,
            })
            .await?;

        record_agreement_transition(AgreementStatus::PendingVerification.as_str());
        info!(
            agreement_id = %agreement.agreement_id,
            template_id = %template.template_id,
            "Agreement draft created"
        );

        Ok(agreement)
    }

    async fn resolve_template(
        &self,
        template_id: Option<Uuid>,
    ) -> Result<AgreementTemplate, ServiceError> {
        let template = match template_id {
            Some(id) => self.store.find_template(id).await?,
            None => self.store.find_default_template().await?,
        };
        template.ok_or_else(|| ServiceError::NotFound("Agreement template".to_string()))
    }

    /// Create the draft and send the first one-time code.
    pub async fn submit_signature(
        &self,
        draft: DraftRequest,
        channel: ContactChannel,
    ) -> Result<PendingSignature, ServiceError> {
        let agreement = self.create_draft(draft).await?;
        let issued = self
            .verification
            .issue(
                agreement.agreement_id,
                agreement.subject_user_id,
                channel,
                &recipients_of(&agreement, None),
            )
            .await?;
        Ok(PendingSignature { agreement, issued })
    }

    /// Send a new code for an agreement still awaiting verification.
    pub async fn resend_challenge(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        channel: ContactChannel,
    ) -> Result<IssuedChallenge, ServiceError> {
        let agreement = self.pending_agreement_of(agreement_id, subject_user_id).await?;
        self.verification
            .issue(
                agreement.agreement_id,
                subject_user_id,
                channel,
                &recipients_of(&agreement, None),
            )
            .await
    }

    /// Verify the submitted code and activate the agreement.
    ///
    /// Prefer passing the `challenge_id` returned at issue time; without it
    /// the most recent pending challenge is used.
    #[instrument(skip(self, code))]
    pub async fn confirm_signature(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        challenge_id: Option<Uuid>,
        code: &str,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        self.pending_agreement_of(agreement_id, subject_user_id)
            .await?;

        match challenge_id {
            Some(challenge_id) => {
                self.verification
                    .verify(challenge_id, agreement_id, subject_user_id, code)
                    .await?
            }
            None => {
                self.verification
                    .verify_latest(agreement_id, subject_user_id, code)
                    .await?
            }
        };

        self.activate(agreement_id).await
    }

    async fn pending_agreement_of(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        let agreement = self
            .store
            .find_agreement(agreement_id)
            .await?
            .filter(|a| a.subject_user_id == subject_user_id)
            .ok_or_else(|| ServiceError::NotFound("Agreement".to_string()))?;

        if agreement.status != AgreementStatus::PendingVerification {
            return Err(ServiceError::Validation(format!(
                "Agreement is {}, not awaiting verification",
                agreement.status
            )));
        }
        Ok(agreement)
    }

    /// Make a verified agreement active and hand the confirmation off to a
    /// background task.
    #[instrument(skip(self))]
    pub(crate) async fn activate(
        &self,
        agreement_id: Uuid,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        let agreement = self
            .store
            .activate_agreement(agreement_id, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Pending agreement".to_string()))?;

        record_agreement_transition(AgreementStatus::Active.as_str());
        info!(agreement_id = %agreement_id, "Agreement activated");

        let manager = self.clone();
        let snapshot = agreement.clone();
        tokio::spawn(async move {
            // Failures are recorded on the agreement for operator resend
            let _ = manager.deliver_confirmation(&snapshot).await;
        });

        Ok(agreement)
    }

    /// Render the agreement document and send it to the signer, copying the
    /// compliance address when configured. The outcome is stored on the
    /// agreement's delivery status.
    #[instrument(skip(self, agreement), fields(agreement_id = %agreement.agreement_id))]
    pub async fn deliver_confirmation(
        &self,
        agreement: &ConfidentialityAgreement,
    ) -> Result<(), ServiceError> {
        let outcome = self.try_deliver(agreement).await;

        let recorded = match &outcome {
            Ok(()) => {
                self.store
                    .set_delivery_status(agreement.agreement_id, DeliveryStatus::Delivered, None)
                    .await
            }
            Err(e) => {
                error!(error = %e, "Agreement confirmation could not be delivered");
                self.store
                    .set_delivery_status(
                        agreement.agreement_id,
                        DeliveryStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await
            }
        };
        if let Err(e) = recorded {
            error!(error = %e, "Failed to record delivery status");
        }

        outcome
    }

    async fn try_deliver(&self, agreement: &ConfidentialityAgreement) -> Result<(), ServiceError> {
        let channel = match (&agreement.contact_email, &agreement.contact_phone) {
            (Some(_), Some(_)) => ContactChannel::Both,
            (Some(_), None) => ContactChannel::Email,
            (None, Some(_)) => ContactChannel::Sms,
            (None, None) => {
                return Err(ServiceError::DependencyFailure(
                    "Agreement has no contact details".to_string(),
                ))
            }
        };

        let document = self
            .documents
            .render(agreement)
            .map_err(|e| ServiceError::DependencyFailure(format!("Document rendering: {}", e)))?;

        let payload = NotificationPayload {
            subject: "Your confidentiality agreement is active".to_string(),
            body: format!(
                "Thank you for signing. Your confidentiality agreement {} is now active.\n\n\
                 A copy of the signed agreement is attached for your records.",
                agreement.agreement_id
            ),
            sms_text: format!(
                "Your confidentiality agreement {} is now active.",
                agreement.agreement_id
            ),
            attachment: Some(document),
        };

        self.dispatcher
            .send(
                channel,
                &recipients_of(agreement, self.compliance_cc.as_deref()),
                &payload,
            )
            .await?;

        info!("Agreement confirmation delivered");
        Ok(())
    }

    /// Operator-triggered redelivery for an active agreement.
    pub async fn resend_confirmation(
        &self,
        agreement_id: Uuid,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        let agreement = self
            .store
            .find_agreement(agreement_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Agreement".to_string()))?;

        if !agreement.is_active() {
            return Err(ServiceError::Validation(
                "Only active agreements have a confirmation to resend".to_string(),
            ));
        }

        self.deliver_confirmation(&agreement).await?;

        self.store
            .find_agreement(agreement_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Agreement".to_string()))
    }

    pub async fn list_undelivered(
        &self,
        limit: i64,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        self.store.list_undelivered_agreements(limit).await
    }

    /// `active -> revoked`. Revoking an already revoked agreement returns it
    /// unchanged.
    #[instrument(skip(self, reason))]
    pub async fn revoke(
        &self,
        agreement_id: Uuid,
        acting_admin_id: Uuid,
        reason: &str,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::Validation(
                "A revocation reason is required".to_string(),
            ));
        }

        if let Some(revoked) = self
            .store
            .revoke_agreement(agreement_id, acting_admin_id, reason, Utc::now())
            .await?
        {
            record_agreement_transition(AgreementStatus::Revoked.as_str());
            info!(agreement_id = %agreement_id, actor_id = %acting_admin_id, "Agreement revoked");
            return Ok(revoked);
        }

        let existing = self
            .store
            .find_agreement(agreement_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Agreement".to_string()))?;

        match existing.status {
            AgreementStatus::Revoked => Ok(existing),
            status => Err(ServiceError::Validation(format!(
                "Only active agreements can be revoked, this one is {}",
                status
            ))),
        }
    }

    /// The active agreement for a key. Several active rows should be
    /// impossible; if found, the newest wins and the anomaly is flagged.
    #[instrument(skip(self))]
    pub async fn get_active_agreement(
        &self,
        subject_user_id: Uuid,
        scope: AgreementScope,
        project_id: Option<Uuid>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        let mut active = self
            .store
            .find_active_agreements(subject_user_id, scope, project_id)
            .await?;

        if active.len() > 1 {
            record_active_agreement_anomaly(scope.as_str());
            warn!(
                count = active.len(),
                kept = %active[0].agreement_id,
                "Multiple active agreements for one subject and scope"
            );
        }

        Ok(if active.is_empty() {
            None
        } else {
            Some(active.swap_remove(0))
        })
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub async fn create_template(
        &self,
        input: CreateTemplate,
    ) -> Result<AgreementTemplate, ServiceError> {
        input
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let template = self.store.insert_template(&input).await?;
        info!(template_id = %template.template_id, "Agreement template created");

        if input.make_default {
            return self.set_default_template(template.template_id).await;
        }
        Ok(template)
    }

    pub async fn list_templates(&self) -> Result<Vec<AgreementTemplate>, ServiceError> {
        self.store.list_templates().await
    }

    /// Swap the default in one step; the previous default is unset atomically.
    #[instrument(skip(self))]
    pub async fn set_default_template(
        &self,
        template_id: Uuid,
    ) -> Result<AgreementTemplate, ServiceError> {
        let template = self
            .store
            .set_default_template(template_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Agreement template".to_string()))?;
        info!(template_id = %template_id, "Default agreement template changed");
        Ok(template)
    }

    pub async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<AgreementStatistics, ServiceError> {
        self.store.agreement_statistics(since).await
    }
}

fn recipients_of(agreement: &ConfidentialityAgreement, cc: Option<&str>) -> Recipients {
    Recipients {
        email: agreement.contact_email.clone(),
        phone: agreement.contact_phone.clone(),
        cc: cc.map(|c| vec![c.to_string()]).unwrap_or_default(),
    }
}
