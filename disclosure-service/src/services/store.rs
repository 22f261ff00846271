//! Persistence seam for the disclosure core.
//!
//! Every state transition is a conditional write that names the state it
//! expects to leave, so concurrent callers cannot both win. Implementations
//! return `Ok(None)` / `Ok(false)` when that precondition no longer holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AccessAuditRecord, AgreementScope, AgreementStatistics, AgreementTemplate, ChallengeStatus,
    ConfidentialityAgreement, CreateTemplate, DeliveryStatus, NegotiationGrant, NewAgreement,
    NewAuditRecord, NewChallenge, ProjectRecord, VerificationChallenge,
};
use crate::services::ServiceError;

#[async_trait]
pub trait DisclosureStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    // Agreements

    async fn insert_agreement(
        &self,
        input: NewAgreement,
    ) -> Result<ConfidentialityAgreement, ServiceError>;

    async fn find_agreement(
        &self,
        agreement_id: Uuid,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError>;

    /// Active agreements for one key, newest first.
    async fn find_active_agreements(
        &self,
        subject_user_id: Uuid,
        scope: AgreementScope,
        project_id: Option<Uuid>,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError>;

    /// Every active agreement the subject holds, any scope.
    async fn list_active_agreements_for_subject(
        &self,
        subject_user_id: Uuid,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError>;

    /// `pending_verification -> active`, retiring any prior active agreement
    /// for the same key to `superseded` in the same unit of work.
    async fn activate_agreement(
        &self,
        agreement_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError>;

    /// `active -> revoked`.
    async fn revoke_agreement(
        &self,
        agreement_id: Uuid,
        actor_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError>;

    async fn set_delivery_status(
        &self,
        agreement_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), ServiceError>;

    /// Active agreements whose confirmation never reached the signer.
    async fn list_undelivered_agreements(
        &self,
        limit: i64,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError>;

    async fn agreement_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<AgreementStatistics, ServiceError>;

    // Challenges

    async fn insert_challenge(
        &self,
        input: NewChallenge,
    ) -> Result<VerificationChallenge, ServiceError>;

    async fn find_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError>;

    /// Newest pending challenge for the pair, ties broken by id.
    async fn find_latest_pending_challenge(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError>;

    /// Expire every pending challenge of the agreement except `keep`.
    async fn supersede_pending_challenges(
        &self,
        agreement_id: Uuid,
        keep: Uuid,
    ) -> Result<u64, ServiceError>;

    /// `pending -> status` for a terminal, non-verified status.
    async fn close_challenge(
        &self,
        challenge_id: Uuid,
        status: ChallengeStatus,
    ) -> Result<bool, ServiceError>;

    /// Count one wrong code. The challenge flips to `failed` on the attempt
    /// that reaches the limit; the count never passes it.
    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError>;

    /// `pending -> verified`, only while unexpired and under the limit.
    async fn mark_challenge_verified(
        &self,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationChallenge>, ServiceError>;

    async fn expire_stale_challenges(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;

    // Negotiation grants and projects, owned elsewhere

    async fn find_negotiation_grants(
        &self,
        project_id: Uuid,
        investor_user_id: Uuid,
    ) -> Result<Vec<NegotiationGrant>, ServiceError>;

    async fn find_project(&self, project_id: Uuid) -> Result<Option<ProjectRecord>, ServiceError>;

    // Audit

    async fn insert_audit_record(
        &self,
        input: NewAuditRecord,
    ) -> Result<AccessAuditRecord, ServiceError>;

    // Gateway request nonces

    /// Hold `nonce` until `expires_utc`. `false` when it is already held.
    async fn claim_nonce(
        &self,
        nonce: &str,
        expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    // Templates

    /// Inserted as non-default; promotion goes through `set_default_template`.
    async fn insert_template(
        &self,
        input: &CreateTemplate,
    ) -> Result<AgreementTemplate, ServiceError>;

    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError>;

    async fn find_default_template(&self) -> Result<Option<AgreementTemplate>, ServiceError>;

    async fn list_templates(&self) -> Result<Vec<AgreementTemplate>, ServiceError>;

    /// Make `template_id` the single default. Readers never observe two defaults.
    async fn set_default_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError>;
}
