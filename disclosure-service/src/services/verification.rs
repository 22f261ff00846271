//! One-time code issue and verification.
//!
//! A challenge moves only forward out of `pending`: to `verified` on a
//! correct code, to `expired` once its window has passed, to `failed` on the
//! mismatch that reaches the attempt limit. Expiry and attempt checks run
//! before the code is compared, so a correct code on a dead challenge still
//! fails.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{VerificationConfig, MAX_CODE_LENGTH};
use crate::models::{
    ChallengePurpose, ChallengeStatus, ContactChannel, NewChallenge, VerificationChallenge,
};
use crate::services::metrics::{record_challenge_issued, record_verification_outcome};
use crate::services::notifier::{NotificationDispatcher, NotificationPayload, Recipients};
use crate::services::{DisclosureStore, ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Result of `issue`. The plaintext code is carried only when exposure is enabled.
#[derive(Clone)]
pub struct IssuedChallenge {
    pub challenge: VerificationChallenge,
    pub dev_code: Option<String>,
}

#[derive(Clone)]
pub struct VerificationChallengeService {
    store: Arc<dyn DisclosureStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    policy: VerificationConfig,
    expose_codes: bool,
}

impl VerificationChallengeService {
    pub fn new(
        store: Arc<dyn DisclosureStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        policy: VerificationConfig,
        expose_codes: bool,
    ) -> Self {
        Self {
            store,
            dispatcher,
            policy,
            expose_codes,
        }
    }

    /// Issue a fresh code for the agreement and send it out-of-band.
    ///
    /// Older pending challenges of the agreement are expired, so only the
    /// newest code can verify. If the code cannot be delivered the new
    /// challenge is expired as well and `DependencyFailure` is returned.
    #[instrument(skip(self, channel, recipients), fields(channel = %channel))]
    pub async fn issue(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        channel: ContactChannel,
        recipients: &Recipients,
    ) -> Result<IssuedChallenge, ServiceError> {
        ensure_reachable(channel, recipients)?;

        let challenge_id = Uuid::new_v4();
        let code = generate_code(self.policy.code_length);
        let code_hash = hash_code(&self.policy.hash_secret, challenge_id, &code);

        let challenge = self
            .store
            .insert_challenge(NewChallenge {
                challenge_id,
                agreement_id,
                subject_user_id,
                contact_channel: channel,
                code_hash,
                purpose: ChallengePurpose::AgreementSignature,
                attempt_limit: self.policy.attempt_limit,
                expires_utc: Utc::now() + Duration::seconds(self.policy.expiry_seconds),
            })
            .await?;

        let superseded = self
            .store
            .supersede_pending_challenges(agreement_id, challenge_id)
            .await?;

        let payload = self.code_payload(&code);
        if let Err(e) = self.dispatcher.send(channel, recipients, &payload).await {
            warn!(
                challenge_id = %challenge_id,
                error = %e,
                "Verification code could not be delivered"
            );
            self.store
                .close_challenge(challenge_id, ChallengeStatus::Expired)
                .await?;
            return Err(e.into());
        }

        record_challenge_issued(channel.as_str());
        info!(
            challenge_id = %challenge_id,
            agreement_id = %agreement_id,
            superseded = superseded,
            "Verification challenge issued"
        );

        Ok(IssuedChallenge {
            challenge,
            dev_code: self.expose_codes.then_some(code),
        })
    }

    /// Verify a code against the challenge returned by `issue`.
    pub async fn verify(
        &self,
        challenge_id: Uuid,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        submitted_code: &str,
    ) -> Result<VerificationChallenge, ServiceError> {
        self.verify_at(
            challenge_id,
            agreement_id,
            subject_user_id,
            submitted_code,
            Utc::now(),
        )
        .await
    }

    /// `verify` against an explicit clock reading.
    #[instrument(skip(self, submitted_code, now))]
    pub async fn verify_at(
        &self,
        challenge_id: Uuid,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationChallenge, ServiceError> {
        let challenge = self
            .store
            .find_challenge(challenge_id)
            .await?
            .filter(|c| c.agreement_id == agreement_id && c.subject_user_id == subject_user_id)
            .ok_or_else(|| ServiceError::NotFound("Verification challenge".to_string()))?;

        let outcome = self.check(challenge, submitted_code, now).await;
        record_verification_outcome(match &outcome {
            Ok(_) => "verified",
            Err(e) => e.code(),
        });
        outcome
    }

    /// Verify against the most recent pending challenge of the agreement.
    /// Ties on creation time go to the higher challenge id.
    pub async fn verify_latest(
        &self,
        agreement_id: Uuid,
        subject_user_id: Uuid,
        submitted_code: &str,
    ) -> Result<VerificationChallenge, ServiceError> {
        let challenge = self
            .store
            .find_latest_pending_challenge(agreement_id, subject_user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Verification challenge".to_string()))?;

        self.verify_at(
            challenge.challenge_id,
            agreement_id,
            subject_user_id,
            submitted_code,
            Utc::now(),
        )
        .await
    }

    async fn check(
        &self,
        challenge: VerificationChallenge,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationChallenge, ServiceError> {
        match challenge.status {
            ChallengeStatus::Pending => {}
            ChallengeStatus::Verified => {
                return Err(ServiceError::NotFound("Verification challenge".to_string()))
            }
            ChallengeStatus::Expired => return Err(ServiceError::Expired),
            ChallengeStatus::Failed => return Err(ServiceError::AttemptsExceeded),
        }

        if challenge.is_expired_at(now) {
            self.store
                .close_challenge(challenge.challenge_id, ChallengeStatus::Expired)
                .await?;
            return Err(ServiceError::Expired);
        }

        if challenge.attempts_exhausted() {
            self.store
                .close_challenge(challenge.challenge_id, ChallengeStatus::Failed)
                .await?;
            return Err(ServiceError::AttemptsExceeded);
        }

        let code = submitted_code.trim();
        if code.is_empty()
            || code.len() > MAX_CODE_LENGTH as usize
            || !code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ServiceError::Validation(
                "Verification code must be numeric".to_string(),
            ));
        }

        let expected = hash_code(&self.policy.hash_secret, challenge.challenge_id, code);
        let matches: bool = expected
            .as_bytes()
            .ct_eq(challenge.code_hash.as_bytes())
            .into();

        if !matches {
            return match self.store.record_failed_attempt(challenge.challenge_id).await? {
                Some(updated) => {
                    if updated.status == ChallengeStatus::Failed {
                        warn!(challenge_id = %updated.challenge_id, "Verification attempts exhausted");
                    }
                    Err(ServiceError::CodeMismatch {
                        remaining_attempts: updated.remaining_attempts(),
                    })
                }
                // Lost a race with another attempt that closed the challenge
                None => Err(self.closed_outcome(challenge.challenge_id).await?),
            };
        }

        match self
            .store
            .mark_challenge_verified(challenge.challenge_id, now)
            .await?
        {
            Some(verified) => {
                info!(challenge_id = %verified.challenge_id, "Verification challenge verified");
                Ok(verified)
            }
            None => Err(self.closed_outcome(challenge.challenge_id).await?),
        }
    }

    /// Error for a challenge that left `pending` between the read and the write.
    async fn closed_outcome(&self, challenge_id: Uuid) -> Result<ServiceError, ServiceError> {
        let current = self.store.find_challenge(challenge_id).await?;
        Ok(match current.map(|c| c.status) {
            Some(ChallengeStatus::Expired) => ServiceError::Expired,
            Some(ChallengeStatus::Failed) | Some(ChallengeStatus::Pending) => {
                ServiceError::AttemptsExceeded
            }
            _ => ServiceError::NotFound("Verification challenge".to_string()),
        })
    }

    /// Expire stale pending challenges. Reporting only; verification checks expiry itself.
    #[instrument(skip(self))]
    pub async fn sweep_stale(&self) -> Result<u64, ServiceError> {
        let expired = self.store.expire_stale_challenges(Utc::now()).await?;
        if expired > 0 {
            info!(expired = expired, "Expired stale verification challenges");
        }
        Ok(expired)
    }

    fn code_payload(&self, code: &str) -> NotificationPayload {
        let minutes = (self.policy.expiry_seconds + 59) / 60;
        NotificationPayload {
            subject: "Your verification code".to_string(),
            body: format!(
                "Your verification code is {}.\n\nIt expires in {} minutes. \
                 If you did not request this code, you can ignore this message.",
                code, minutes
            ),
            sms_text: format!("{} is your verification code. Valid for {} minutes.", code, minutes),
            attachment: None,
        }
    }
}

fn ensure_reachable(channel: ContactChannel, recipients: &Recipients) -> Result<(), ServiceError> {
    if channel.includes_email() && recipients.email.is_none() {
        return Err(ServiceError::Validation(
            "An email address is required for this channel".to_string(),
        ));
    }
    if channel.includes_sms() && recipients.phone.is_none() {
        return Err(ServiceError::Validation(
            "A phone number is required for this channel".to_string(),
        ));
    }
    Ok(())
}

/// Uniform over the whole `0..10^length` range, zero-padded.
pub fn generate_code(length: u32) -> String {
    let upper = 10u64.pow(length);
    let value = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", value, width = length as usize)
}

/// Keyed hash binding the code to its challenge, hex encoded.
pub fn hash_code(secret: &str, challenge_id: Uuid, code: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(challenge_id.as_bytes());
    mac.update(b":");
    mac.update(code.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
