//! Verification challenge model - one OTP window tied to one agreement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Channel(s) the code is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Email,
    Sms,
    Both,
}

string_enum!(ContactChannel, "contact channel", {
    Email => "email",
    Sms => "sms",
    Both => "both",
});

impl ContactChannel {
    pub fn includes_email(&self) -> bool {
        matches!(self, ContactChannel::Email | ContactChannel::Both)
    }

    pub fn includes_sms(&self) -> bool {
        matches!(self, ContactChannel::Sms | ContactChannel::Both)
    }
}

/// Challenge purpose codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    AgreementSignature,
}

string_enum!(ChallengePurpose, "challenge purpose", {
    AgreementSignature => "agreement_signature",
});

/// Challenge states. Transitions only go forward out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Expired,
    Failed,
}

string_enum!(ChallengeStatus, "challenge status", {
    Pending => "pending",
    Verified => "verified",
    Expired => "expired",
    Failed => "failed",
});

/// Verification challenge entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub challenge_id: Uuid,
    pub agreement_id: Uuid,
    pub subject_user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub contact_channel: ContactChannel,
    /// Keyed one-way hash of the code; the plaintext is never stored.
    #[serde(skip_serializing, default)]
    pub code_hash: String,
    #[sqlx(try_from = "String")]
    pub purpose: ChallengePurpose,
    #[sqlx(try_from = "String")]
    pub status: ChallengeStatus,
    pub attempt_count: i32,
    pub attempt_limit: i32,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub verified_utc: Option<DateTime<Utc>>,
}

impl VerificationChallenge {
    /// Strictly after the expiry instant counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_utc
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.attempt_limit
    }

    pub fn remaining_attempts(&self) -> i32 {
        (self.attempt_limit - self.attempt_count).max(0)
    }
}

/// Input for inserting a pending challenge.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub challenge_id: Uuid,
    pub agreement_id: Uuid,
    pub subject_user_id: Uuid,
    pub contact_channel: ContactChannel,
    pub code_hash: String,
    pub purpose: ChallengePurpose,
    pub attempt_limit: i32,
    pub expires_utc: DateTime<Utc>,
}

impl NewChallenge {
    /// Materialise the row as the store would return it right after insert.
    pub fn into_challenge(self, now: DateTime<Utc>) -> VerificationChallenge {
        VerificationChallenge {
            challenge_id: self.challenge_id,
            agreement_id: self.agreement_id,
            subject_user_id: self.subject_user_id,
            contact_channel: self.contact_channel,
            code_hash: self.code_hash,
            purpose: self.purpose,
            status: ChallengeStatus::Pending,
            attempt_count: 0,
            attempt_limit: self.attempt_limit,
            expires_utc: self.expires_utc,
            created_utc: now,
            verified_utc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge(attempt_count: i32, expires_utc: DateTime<Utc>) -> VerificationChallenge {
        let mut c = NewChallenge {
            challenge_id: Uuid::new_v4(),
            agreement_id: Uuid::new_v4(),
            subject_user_id: Uuid::new_v4(),
            contact_channel: ContactChannel::Email,
            code_hash: "hash".to_string(),
            purpose: ChallengePurpose::AgreementSignature,
            attempt_limit: 5,
            expires_utc,
        }
        .into_challenge(Utc::now());
        c.attempt_count = attempt_count;
        c
    }

    #[test]
    fn test_expiry_boundary() {
        let expires = Utc::now();
        let c = challenge(0, expires);
        assert!(!c.is_expired_at(expires));
        assert!(c.is_expired_at(expires + Duration::milliseconds(1)));
    }

    #[test]
    fn test_attempt_accounting() {
        let c = challenge(3, Utc::now() + Duration::minutes(10));
        assert!(!c.attempts_exhausted());
        assert_eq!(c.remaining_attempts(), 2);

        let c = challenge(5, Utc::now() + Duration::minutes(10));
        assert!(c.attempts_exhausted());
        assert_eq!(c.remaining_attempts(), 0);
    }

    #[test]
    fn test_code_hash_never_serialized() {
        let c = challenge(0, Utc::now());
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("code_hash"));
        assert!(json.contains("\"status\":\"pending\""));
    }

    #[test]
    fn test_channel_membership() {
        assert!(ContactChannel::Both.includes_email());
        assert!(ContactChannel::Both.includes_sms());
        assert!(!ContactChannel::Email.includes_sms());
        assert!(!ContactChannel::Sms.includes_email());
    }
}
