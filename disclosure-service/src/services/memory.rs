//! In-process store used by tests and local development without Postgres.
//!
//! All state sits behind one lock, so every trait call is a single atomic
//! step just like the conditional statements in [`Database`](super::Database).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AccessAuditRecord, AgreementScope, AgreementStatistics, AgreementStatus, AgreementTemplate,
    ChallengeStatus, ConfidentialityAgreement, CreateTemplate, DeliveryStatus, NegotiationGrant,
    NewAgreement, NewAuditRecord, NewChallenge, ProjectRecord, VerificationChallenge,
};
use crate::services::{DisclosureStore, ServiceError};

#[derive(Default)]
struct State {
    agreements: HashMap<Uuid, ConfidentialityAgreement>,
    challenges: HashMap<Uuid, VerificationChallenge>,
    grants: HashMap<Uuid, NegotiationGrant>,
    projects: HashMap<Uuid, ProjectRecord>,
    audit: Vec<AccessAuditRecord>,
    templates: HashMap<Uuid, AgreementTemplate>,
    nonces: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    reject_audit_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_reject_audit_writes(&self, reject: bool) {
        self.reject_audit_writes.store(reject, Ordering::SeqCst);
    }

    pub async fn upsert_project(&self, project: ProjectRecord) {
        self.state
            .write()
            .await
            .projects
            .insert(project.project_id, project);
    }

    pub async fn upsert_grant(&self, grant: NegotiationGrant) {
        self.state.write().await.grants.insert(grant.grant_id, grant);
    }

    /// Load a row exactly as given, bypassing lifecycle checks.
    pub async fn import_agreement(&self, agreement: ConfidentialityAgreement) {
        self.state
            .write()
            .await
            .agreements
            .insert(agreement.agreement_id, agreement);
    }

    /// Load a challenge exactly as given, e.g. with a chosen `created_utc`.
    pub async fn import_challenge(&self, challenge: VerificationChallenge) {
        self.state
            .write()
            .await
            .challenges
            .insert(challenge.challenge_id, challenge);
    }

    pub async fn audit_records(&self) -> Vec<AccessAuditRecord> {
        self.state.read().await.audit.clone()
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::database("In-memory store", "unavailable"));
        }
        Ok(())
    }
}

fn same_key(
    agreement: &ConfidentialityAgreement,
    subject_user_id: Uuid,
    scope: AgreementScope,
    project_id: Option<Uuid>,
) -> bool {
    agreement.subject_user_id == subject_user_id
        && agreement.scope == scope
        && agreement.project_id == project_id
}

fn newest_first(a: &ConfidentialityAgreement, b: &ConfidentialityAgreement) -> std::cmp::Ordering {
    b.created_utc
        .cmp(&a.created_utc)
        .then_with(|| b.agreement_id.cmp(&a.agreement_id))
}

#[async_trait]
impl DisclosureStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.check_available()
    }

    async fn insert_agreement(
        &self,
        input: NewAgreement,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        self.check_available()?;
        let agreement = input.into_agreement(Utc::now());
        self.state
            .write()
            .await
            .agreements
            .insert(agreement.agreement_id, agreement.clone());
        Ok(agreement)
    }

    async fn find_agreement(
        &self,
        agreement_id: Uuid,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        Ok(self.state.read().await.agreements.get(&agreement_id).cloned())
    }

    async fn find_active_agreements(
        &self,
        subject_user_id: Uuid,
        scope: AgreementScope,
        project_id: Option<Uuid>,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .agreements
            .values()
            .filter(|a| a.is_active() && same_key(a, subject_user_id, scope, project_id))
            .cloned()
            .collect();
        found.sort_by(newest_first);
        Ok(found)
    }

    async fn list_active_agreements_for_subject(
        &self,
        subject_user_id: Uuid,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .agreements
            .values()
            .filter(|a| a.is_active() && a.subject_user_id == subject_user_id)
            .cloned()
            .collect();
        found.sort_by(newest_first);
        Ok(found)
    }

    async fn activate_agreement(
        &self,
        agreement_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let (subject, scope, project_id) = match state.agreements.get(&agreement_id) {
            Some(a) if a.status == AgreementStatus::PendingVerification => {
                (a.subject_user_id, a.scope, a.project_id)
            }
            _ => return Ok(None),
        };

        for prior in state.agreements.values_mut() {
            if prior.is_active() && same_key(prior, subject, scope, project_id) {
                prior.status = AgreementStatus::Superseded;
                prior.updated_utc = now;
            }
        }

        let Some(agreement) = state.agreements.get_mut(&agreement_id) else {
            return Ok(None);
        };
        agreement.status = AgreementStatus::Active;
        agreement.verified = true;
        agreement.verified_utc = Some(now);
        agreement.updated_utc = now;
        Ok(Some(agreement.clone()))
    }

    async fn revoke_agreement(
        &self,
        agreement_id: Uuid,
        actor_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.agreements.get_mut(&agreement_id) {
            Some(agreement) if agreement.is_active() => {
                agreement.status = AgreementStatus::Revoked;
                agreement.revoked_by = Some(actor_id);
                agreement.revocation_reason = Some(reason.to_string());
                agreement.revoked_utc = Some(now);
                agreement.updated_utc = now;
                Ok(Some(agreement.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_delivery_status(
        &self,
        agreement_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(agreement) = state.agreements.get_mut(&agreement_id) {
            agreement.delivery_status = status;
            agreement.delivery_error = error.map(str::to_string);
            agreement.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn list_undelivered_agreements(
        &self,
        limit: i64,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .agreements
            .values()
            .filter(|a| a.is_active() && a.delivery_status != DeliveryStatus::Delivered)
            .cloned()
            .collect();
        found.sort_by(newest_first);
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn agreement_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<AgreementStatistics, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(AgreementStatistics::tally(
            since,
            state
                .agreements
                .values()
                .filter(|a| since.is_none_or(|s| a.created_utc >= s)),
        ))
    }

    async fn insert_challenge(
        &self,
        input: NewChallenge,
    ) -> Result<VerificationChallenge, ServiceError> {
        self.check_available()?;
        let challenge = input.into_challenge(Utc::now());
        self.state
            .write()
            .await
            .challenges
            .insert(challenge.challenge_id, challenge.clone());
        Ok(challenge)
    }

    async fn find_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        self.check_available()?;
        Ok(self.state.read().await.challenges.get(&challenge_id).cloned())
    }

    async fn find_latest_pending_challenge(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .challenges
            .values()
            .filter(|c| {
                c.agreement_id == agreement_id
                    && c.subject_user_id == subject_user_id
                    && c.status == ChallengeStatus::Pending
            })
            .max_by(|a, b| {
                a.created_utc
                    .cmp(&b.created_utc)
                    .then_with(|| a.challenge_id.cmp(&b.challenge_id))
            })
            .cloned())
    }

    async fn supersede_pending_challenges(
        &self,
        agreement_id: Uuid,
        keep: Uuid,
    ) -> Result<u64, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let mut count = 0;
        for challenge in state.challenges.values_mut() {
            if challenge.agreement_id == agreement_id
                && challenge.challenge_id != keep
                && challenge.status == ChallengeStatus::Pending
            {
                challenge.status = ChallengeStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn close_challenge(
        &self,
        challenge_id: Uuid,
        status: ChallengeStatus,
    ) -> Result<bool, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.challenges.get_mut(&challenge_id) {
            Some(challenge) if challenge.status == ChallengeStatus::Pending => {
                challenge.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.challenges.get_mut(&challenge_id) {
            Some(challenge)
                if challenge.status == ChallengeStatus::Pending
                    && challenge.attempt_count < challenge.attempt_limit =>
            {
                challenge.attempt_count += 1;
                if challenge.attempt_count >= challenge.attempt_limit {
                    challenge.status = ChallengeStatus::Failed;
                }
                Ok(Some(challenge.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_challenge_verified(
        &self,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.challenges.get_mut(&challenge_id) {
            Some(challenge)
                if challenge.status == ChallengeStatus::Pending
                    && !challenge.attempts_exhausted()
                    && !challenge.is_expired_at(now) =>
            {
                challenge.status = ChallengeStatus::Verified;
                challenge.verified_utc = Some(now);
                Ok(Some(challenge.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_stale_challenges(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let mut count = 0;
        for challenge in state.challenges.values_mut() {
            if challenge.status == ChallengeStatus::Pending && challenge.is_expired_at(now) {
                challenge.status = ChallengeStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find_negotiation_grants(
        &self,
        project_id: Uuid,
        investor_user_id: Uuid,
    ) -> Result<Vec<NegotiationGrant>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .grants
            .values()
            .filter(|g| g.project_id == project_id && g.investor_user_id == investor_user_id)
            .cloned()
            .collect())
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<ProjectRecord>, ServiceError> {
        self.check_available()?;
        Ok(self.state.read().await.projects.get(&project_id).cloned())
    }

    async fn insert_audit_record(
        &self,
        input: NewAuditRecord,
    ) -> Result<AccessAuditRecord, ServiceError> {
        self.check_available()?;
        if self.reject_audit_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::database("Failed to insert audit record", "rejected"));
        }
        let record = input.into_record(Uuid::new_v4(), Utc::now());
        self.state.write().await.audit.push(record.clone());
        Ok(record)
    }

    async fn claim_nonce(
        &self,
        nonce: &str,
        expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.nonces.retain(|_, held_until| *held_until >= now);
        if state.nonces.contains_key(nonce) {
            return Ok(false);
        }
        state.nonces.insert(nonce.to_string(), expires_utc);
        Ok(true)
    }

    async fn insert_template(
        &self,
        input: &CreateTemplate,
    ) -> Result<AgreementTemplate, ServiceError> {
        self.check_available()?;
        let now = Utc::now();
        let template = AgreementTemplate {
            template_id: Uuid::new_v4(),
            name: input.name.clone(),
            version_label: input.version_label.clone(),
            body_text: input.body_text.clone(),
            is_default: false,
            created_utc: now,
            updated_utc: now,
        };
        self.state
            .write()
            .await
            .templates
            .insert(template.template_id, template.clone());
        Ok(template)
    }

    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError> {
        self.check_available()?;
        Ok(self.state.read().await.templates.get(&template_id).cloned())
    }

    async fn find_default_template(&self) -> Result<Option<AgreementTemplate>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.templates.values().find(|t| t.is_default).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<AgreementTemplate>, ServiceError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut templates: Vec<_> = state.templates.values().cloned().collect();
        templates.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.template_id.cmp(&a.template_id))
        });
        Ok(templates)
    }

    async fn set_default_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.templates.contains_key(&template_id) {
            return Ok(None);
        }
        let now = Utc::now();
        for template in state.templates.values_mut() {
            let should_default = template.template_id == template_id;
            if template.is_default != should_default {
                template.is_default = should_default;
                template.updated_utc = now;
            }
        }
        Ok(state.templates.get(&template_id).cloned())
    }
}
