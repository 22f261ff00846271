//! Database service for disclosure-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    AccessAuditRecord, AgreementScope, AgreementStatistics, AgreementStatus, AgreementTemplate,
    ChallengeStatus, ConfidentialityAgreement, CreateTemplate, DeliveryStatus, GrantStatus,
    NegotiationGrant, NewAgreement, NewAuditRecord, NewChallenge, ProjectRecord,
    VerificationChallenge,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::{DisclosureStore, ServiceError};

const AGREEMENT_COLUMNS: &str = "agreement_id, subject_user_id, scope, project_id, template_id, \
    version_text, signature_artifact, status, verified, contact_email, contact_phone, ip_address, \
    user_agent, device_type, browser, delivery_status, delivery_error, revoked_by, \
    revocation_reason, revoked_utc, verified_utc, created_utc, updated_utc";

const CHALLENGE_COLUMNS: &str = "challenge_id, agreement_id, subject_user_id, contact_channel, \
    code_hash, purpose, status, attempt_count, attempt_limit, expires_utc, created_utc, verified_utc";

const TEMPLATE_COLUMNS: &str =
    "template_id, name, version_label, body_text, is_default, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "disclosure-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, ServiceError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| ServiceError::database("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::database("Migration failed", e))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl DisclosureStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ServiceError::database("Health check failed", e))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Agreement Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(agreement_id = %input.agreement_id))]
    async fn insert_agreement(
        &self,
        input: NewAgreement,
    ) -> Result<ConfidentialityAgreement, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_agreement"])
            .start_timer();

        let agreement = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            INSERT INTO confidentiality_agreements (agreement_id, subject_user_id, scope, project_id, template_id, version_text, signature_artifact, status, contact_email, contact_phone, ip_address, user_agent, device_type, browser, delivery_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {AGREEMENT_COLUMNS}
            "#
        ))
        .bind(input.agreement_id)
        .bind(input.subject_user_id)
        .bind(input.scope.as_str())
        .bind(input.project_id)
        .bind(input.template_id)
        .bind(&input.version_text)
        .bind(&input.signature_artifact)
        .bind(AgreementStatus::PendingVerification.as_str())
        .bind(&input.contact.email)
        .bind(&input.contact.phone)
        .bind(&input.metadata.ip_address)
        .bind(&input.metadata.user_agent)
        .bind(&input.metadata.device_type)
        .bind(&input.metadata.browser)
        .bind(DeliveryStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to create agreement", e))?;

        timer.observe_duration();
        Ok(agreement)
    }

    #[instrument(skip(self))]
    async fn find_agreement(
        &self,
        agreement_id: Uuid,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_agreement"])
            .start_timer();

        let agreement = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            "SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements WHERE agreement_id = $1"
        ))
        .bind(agreement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get agreement", e))?;

        timer.observe_duration();
        Ok(agreement)
    }

    #[instrument(skip(self))]
    async fn find_active_agreements(
        &self,
        subject_user_id: Uuid,
        scope: AgreementScope,
        project_id: Option<Uuid>,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_agreements"])
            .start_timer();

        let agreements = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements
            WHERE subject_user_id = $1
              AND scope = $2
              AND project_id IS NOT DISTINCT FROM $3
              AND status = 'active'
            ORDER BY created_utc DESC, agreement_id DESC
            "#
        ))
        .bind(subject_user_id)
        .bind(scope.as_str())
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to find active agreements", e))?;

        timer.observe_duration();
        Ok(agreements)
    }

    #[instrument(skip(self))]
    async fn list_active_agreements_for_subject(
        &self,
        subject_user_id: Uuid,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_agreements_for_subject"])
            .start_timer();

        let agreements = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements
            WHERE subject_user_id = $1 AND status = 'active'
            ORDER BY created_utc DESC, agreement_id DESC
            "#
        ))
        .bind(subject_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to list active agreements", e))?;

        timer.observe_duration();
        Ok(agreements)
    }

    /// Serialised per subject with a transaction-scoped advisory lock, so two
    /// activations for the same key cannot both leave an active row behind.
    #[instrument(skip(self))]
    async fn activate_agreement(
        &self,
        agreement_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_agreement"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServiceError::database("Failed to begin transaction", e))?;

        let pending = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements
            WHERE agreement_id = $1 AND status = 'pending_verification'
            "#
        ))
        .bind(agreement_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ServiceError::database("Failed to load agreement", e))?;

        let Some(pending) = pending else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(pending.subject_user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::database("Failed to lock subject", e))?;

        let superseded = sqlx::query(
            r#"
            UPDATE confidentiality_agreements
            SET status = 'superseded', updated_utc = $4
            WHERE subject_user_id = $1
              AND scope = $2
              AND project_id IS NOT DISTINCT FROM $3
              AND status = 'active'
            "#,
        )
        .bind(pending.subject_user_id)
        .bind(pending.scope.as_str())
        .bind(pending.project_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| ServiceError::database("Failed to supersede prior agreement", e))?
        .rows_affected();

        let activated = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            UPDATE confidentiality_agreements
            SET status = 'active', verified = TRUE, verified_utc = $2, updated_utc = $2
            WHERE agreement_id = $1 AND status = 'pending_verification'
            RETURNING {AGREEMENT_COLUMNS}
            "#
        ))
        .bind(agreement_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ServiceError::database("Failed to activate agreement", e))?;

        if activated.is_none() {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::database("Failed to commit activation", e))?;

        timer.observe_duration();
        if superseded > 0 {
            info!(agreement_id = %agreement_id, superseded, "Prior active agreement superseded");
        }
        Ok(activated)
    }

    #[instrument(skip(self, reason))]
    async fn revoke_agreement(
        &self,
        agreement_id: Uuid,
        actor_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revoke_agreement"])
            .start_timer();

        let agreement = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            UPDATE confidentiality_agreements
            SET status = 'revoked', revoked_by = $2, revocation_reason = $3, revoked_utc = $4, updated_utc = $4
            WHERE agreement_id = $1 AND status = 'active'
            RETURNING {AGREEMENT_COLUMNS}
            "#
        ))
        .bind(agreement_id)
        .bind(actor_id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to revoke agreement", e))?;

        timer.observe_duration();
        Ok(agreement)
    }

    #[instrument(skip(self, error))]
    async fn set_delivery_status(
        &self,
        agreement_id: Uuid,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_delivery_status"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE confidentiality_agreements
            SET delivery_status = $2, delivery_error = $3, updated_utc = NOW()
            WHERE agreement_id = $1
            "#,
        )
        .bind(agreement_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to update delivery status", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_undelivered_agreements(
        &self,
        limit: i64,
    ) -> Result<Vec<ConfidentialityAgreement>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_undelivered_agreements"])
            .start_timer();

        let agreements = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements
            WHERE status = 'active' AND delivery_status <> 'delivered'
            ORDER BY created_utc DESC, agreement_id DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to list undelivered agreements", e))?;

        timer.observe_duration();
        Ok(agreements)
    }

    #[instrument(skip(self))]
    async fn agreement_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<AgreementStatistics, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["agreement_statistics"])
            .start_timer();

        let agreements = sqlx::query_as::<_, ConfidentialityAgreement>(&format!(
            r#"
            SELECT {AGREEMENT_COLUMNS} FROM confidentiality_agreements
            WHERE $1::timestamptz IS NULL OR created_utc >= $1
            "#
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to load agreement statistics", e))?;

        timer.observe_duration();
        Ok(AgreementStatistics::tally(since, &agreements))
    }

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(challenge_id = %input.challenge_id))]
    async fn insert_challenge(
        &self,
        input: NewChallenge,
    ) -> Result<VerificationChallenge, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_challenge"])
            .start_timer();

        let challenge = sqlx::query_as::<_, VerificationChallenge>(&format!(
            r#"
            INSERT INTO verification_challenges (challenge_id, agreement_id, subject_user_id, contact_channel, code_hash, purpose, status, attempt_limit, expires_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {CHALLENGE_COLUMNS}
            "#
        ))
        .bind(input.challenge_id)
        .bind(input.agreement_id)
        .bind(input.subject_user_id)
        .bind(input.contact_channel.as_str())
        .bind(&input.code_hash)
        .bind(input.purpose.as_str())
        .bind(ChallengeStatus::Pending.as_str())
        .bind(input.attempt_limit)
        .bind(input.expires_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to create challenge", e))?;

        timer.observe_duration();
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn find_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_challenge"])
            .start_timer();

        let challenge = sqlx::query_as::<_, VerificationChallenge>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM verification_challenges WHERE challenge_id = $1"
        ))
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get challenge", e))?;

        timer.observe_duration();
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn find_latest_pending_challenge(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_latest_pending_challenge"])
            .start_timer();

        let challenge = sqlx::query_as::<_, VerificationChallenge>(&format!(
            r#"
            SELECT {CHALLENGE_COLUMNS} FROM verification_challenges
            WHERE agreement_id = $1 AND subject_user_id = $2 AND status = 'pending'
            ORDER BY created_utc DESC, challenge_id DESC
            LIMIT 1
            "#
        ))
        .bind(agreement_id)
        .bind(subject_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get latest challenge", e))?;

        timer.observe_duration();
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn supersede_pending_challenges(
        &self,
        agreement_id: Uuid,
        keep: Uuid,
    ) -> Result<u64, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["supersede_pending_challenges"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE verification_challenges
            SET status = 'expired'
            WHERE agreement_id = $1 AND challenge_id <> $2 AND status = 'pending'
            "#,
        )
        .bind(agreement_id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to supersede challenges", e))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn close_challenge(
        &self,
        challenge_id: Uuid,
        status: ChallengeStatus,
    ) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_challenge"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE verification_challenges
            SET status = $2
            WHERE challenge_id = $1 AND status = 'pending'
            "#,
        )
        .bind(challenge_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to close challenge", e))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_failed_attempt"])
            .start_timer();

        let challenge = sqlx::query_as::<_, VerificationChallenge>(&format!(
            r#"
            UPDATE verification_challenges
            SET attempt_count = attempt_count + 1,
                status = CASE WHEN attempt_count + 1 >= attempt_limit THEN 'failed' ELSE status END
            WHERE challenge_id = $1 AND status = 'pending' AND attempt_count < attempt_limit
            RETURNING {CHALLENGE_COLUMNS}
            "#
        ))
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to record attempt", e))?;

        timer.observe_duration();
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn mark_challenge_verified(
        &self,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationChallenge>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_challenge_verified"])
            .start_timer();

        let challenge = sqlx::query_as::<_, VerificationChallenge>(&format!(
            r#"
            UPDATE verification_challenges
            SET status = 'verified', verified_utc = $2
            WHERE challenge_id = $1
              AND status = 'pending'
              AND attempt_count < attempt_limit
              AND expires_utc >= $2
            RETURNING {CHALLENGE_COLUMNS}
            "#
        ))
        .bind(challenge_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to verify challenge", e))?;

        timer.observe_duration();
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn expire_stale_challenges(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_stale_challenges"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE verification_challenges
            SET status = 'expired'
            WHERE status = 'pending' AND expires_utc < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to expire challenges", e))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Grant, Project and Audit Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_negotiation_grants(
        &self,
        project_id: Uuid,
        investor_user_id: Uuid,
    ) -> Result<Vec<NegotiationGrant>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_negotiation_grants"])
            .start_timer();

        let grants = sqlx::query_as::<_, NegotiationGrant>(
            r#"
            SELECT grant_id, project_id, investor_user_id, deposit_amount, status, full_access, created_utc, updated_utc
            FROM negotiation_grants
            WHERE project_id = $1 AND investor_user_id = $2
            ORDER BY created_utc DESC
            "#,
        )
        .bind(project_id)
        .bind(investor_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to find negotiation grants", e))?;

        timer.observe_duration();
        if grants.iter().filter(|g| g.status == GrantStatus::Active).count() > 1 {
            warn!(project_id = %project_id, "Multiple active negotiation grants for one investor");
        }
        Ok(grants)
    }

    #[instrument(skip(self))]
    async fn find_project(&self, project_id: Uuid) -> Result<Option<ProjectRecord>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_project"])
            .start_timer();

        let project = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT project_id, title, public_description, category, media, funding_goal,
                   current_funding, backer_count, funding_end_utc, creator_display_name,
                   full_description, support_packages, team_members, faq, updates,
                   risk_disclosures, confidential_description, confidential_documents,
                   detailed_financials, business_plan
            FROM projects
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get project", e))?;

        timer.observe_duration();
        Ok(project)
    }

    #[instrument(skip(self, input), fields(project_id = %input.project_id))]
    async fn insert_audit_record(
        &self,
        input: NewAuditRecord,
    ) -> Result<AccessAuditRecord, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_audit_record"])
            .start_timer();

        let record = sqlx::query_as::<_, AccessAuditRecord>(
            r#"
            INSERT INTO access_audit_records (audit_id, project_id, subject_user_id, resolved_level, event_type, content_type, content_id, ip_address, user_agent, request_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING audit_id, project_id, subject_user_id, resolved_level, event_type, content_type, content_id, ip_address, user_agent, request_id, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.project_id)
        .bind(input.subject_user_id)
        .bind(input.resolved_level.as_str())
        .bind(input.event_type.as_str())
        .bind(&input.content_type)
        .bind(&input.content_id)
        .bind(&input.context.ip_address)
        .bind(&input.context.user_agent)
        .bind(&input.context.request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to insert audit record", e))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, nonce))]
    async fn claim_nonce(
        &self,
        nonce: &str,
        expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_nonce"])
            .start_timer();

        // Lapsed entries are purged on the way; a lapsed copy of this nonce is reclaimed in place
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            WITH purged AS (
                DELETE FROM request_nonces WHERE expires_utc < $3 AND nonce <> $1
            )
            INSERT INTO request_nonces (nonce, expires_utc)
            VALUES ($1, $2)
            ON CONFLICT (nonce) DO UPDATE SET expires_utc = EXCLUDED.expires_utc
            WHERE request_nonces.expires_utc < $3
            RETURNING nonce
            "#,
        )
        .bind(nonce)
        .bind(expires_utc)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to claim request nonce", e))?;

        timer.observe_duration();
        Ok(claimed.is_some())
    }

    // =========================================================================
    // Template Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn insert_template(
        &self,
        input: &CreateTemplate,
    ) -> Result<AgreementTemplate, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_template"])
            .start_timer();

        let template = sqlx::query_as::<_, AgreementTemplate>(&format!(
            r#"
            INSERT INTO agreement_templates (template_id, name, version_label, body_text)
            VALUES ($1, $2, $3, $4)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.version_label)
        .bind(&input.body_text)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to create template", e))?;

        timer.observe_duration();
        Ok(template)
    }

    #[instrument(skip(self))]
    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_template"])
            .start_timer();

        let template = sqlx::query_as::<_, AgreementTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM agreement_templates WHERE template_id = $1"
        ))
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get template", e))?;

        timer.observe_duration();
        Ok(template)
    }

    #[instrument(skip(self))]
    async fn find_default_template(&self) -> Result<Option<AgreementTemplate>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_default_template"])
            .start_timer();

        let template = sqlx::query_as::<_, AgreementTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM agreement_templates WHERE is_default"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to get default template", e))?;

        timer.observe_duration();
        Ok(template)
    }

    #[instrument(skip(self))]
    async fn list_templates(&self) -> Result<Vec<AgreementTemplate>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_templates"])
            .start_timer();

        let templates = sqlx::query_as::<_, AgreementTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM agreement_templates ORDER BY created_utc DESC, template_id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::database("Failed to list templates", e))?;

        timer.observe_duration();
        Ok(templates)
    }

    /// Unset-then-set inside one transaction under a global advisory lock.
    /// The partial unique index on `is_default` backs the single-default rule.
    #[instrument(skip(self))]
    async fn set_default_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<AgreementTemplate>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_default_template"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServiceError::database("Failed to begin transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('agreement_templates.is_default'))")
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::database("Failed to lock templates", e))?;

        sqlx::query(
            r#"
            UPDATE agreement_templates
            SET is_default = FALSE, updated_utc = NOW()
            WHERE is_default AND template_id <> $1
            "#,
        )
        .bind(template_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ServiceError::database("Failed to clear default template", e))?;

        let template = sqlx::query_as::<_, AgreementTemplate>(&format!(
            r#"
            UPDATE agreement_templates
            SET is_default = TRUE, updated_utc = NOW()
            WHERE template_id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(template_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ServiceError::database("Failed to set default template", e))?;

        if template.is_none() {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::database("Failed to commit default template", e))?;

        timer.observe_duration();
        Ok(template)
    }
}
