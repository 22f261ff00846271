//! One-time code verification: expiry, attempt limits, supersession.

mod common;

use chrono::{Duration, Utc};
use common::{platform_draft, wrong_code, TestContext};
use disclosure_service::models::{
    ChallengePurpose, ChallengeStatus, ContactChannel, NewChallenge, VerificationChallenge,
};
use disclosure_service::services::{DisclosureStore, Recipients, ServiceError};
use uuid::Uuid;

#[tokio::test]
async fn test_correct_code_verifies_once() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let challenge_id = pending.issued.challenge.challenge_id;
    let agreement_id = pending.agreement.agreement_id;
    let code = pending.issued.dev_code.unwrap();

    let verification = ctx.state.agreements.verification();
    let verified = verification
        .verify(challenge_id, agreement_id, subject, &code)
        .await
        .unwrap();
    assert_eq!(verified.status, ChallengeStatus::Verified);
    assert!(verified.verified_utc.is_some());

    // A verified challenge cannot be reused
    let again = verification
        .verify(challenge_id, agreement_id, subject, &code)
        .await;
    assert!(matches!(again, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_expiry_beats_correct_code() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let challenge = pending.issued.challenge.clone();
    let code = pending.issued.dev_code.unwrap();

    let late = challenge.expires_utc + Duration::seconds(1);
    let result = ctx
        .state
        .agreements
        .verification()
        .verify_at(
            challenge.challenge_id,
            pending.agreement.agreement_id,
            subject,
            &code,
            late,
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Expired)));

    let stored = ctx
        .store
        .find_challenge(challenge.challenge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ChallengeStatus::Expired);
}

#[tokio::test]
async fn test_code_valid_at_exact_expiry_instant() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let challenge = pending.issued.challenge.clone();

    let result = ctx
        .state
        .agreements
        .verification()
        .verify_at(
            challenge.challenge_id,
            pending.agreement.agreement_id,
            subject,
            &pending.issued.dev_code.unwrap(),
            challenge.expires_utc,
        )
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_attempt_limit_locks_challenge() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let challenge_id = pending.issued.challenge.challenge_id;
    let agreement_id = pending.agreement.agreement_id;
    let code = pending.issued.dev_code.unwrap();
    let bad = wrong_code(&code);
    let verification = ctx.state.agreements.verification();

    for expected_remaining in (0..5).rev() {
        let result = verification
            .verify(challenge_id, agreement_id, subject, &bad)
            .await;
        match result {
            Err(ServiceError::CodeMismatch { remaining_attempts }) => {
                assert_eq!(remaining_attempts, expected_remaining)
            }
            other => panic!("Expected CodeMismatch, got {:?}", other),
        }
    }

    // Even the right code is refused once the limit is reached
    let locked = verification
        .verify(challenge_id, agreement_id, subject, &code)
        .await;
    assert!(matches!(locked, Err(ServiceError::AttemptsExceeded)));

    let stored = ctx.store.find_challenge(challenge_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ChallengeStatus::Failed);
    assert_eq!(stored.attempt_count, stored.attempt_limit);
}

#[tokio::test]
async fn test_malformed_code_does_not_consume_attempt() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let challenge_id = pending.issued.challenge.challenge_id;

    for input in ["", "12ab56", "1234567890"] {
        let result = ctx
            .state
            .agreements
            .verification()
            .verify(challenge_id, pending.agreement.agreement_id, subject, input)
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))), "input {:?}", input);
    }

    let stored = ctx.store.find_challenge(challenge_id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 0);
}

#[tokio::test]
async fn test_challenge_belongs_to_subject() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;

    let result = ctx
        .state
        .agreements
        .verification()
        .verify(
            pending.issued.challenge.challenge_id,
            pending.agreement.agreement_id,
            Uuid::new_v4(),
            &pending.issued.dev_code.unwrap(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_resend_supersedes_previous_code() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let agreement_id = pending.agreement.agreement_id;
    let first_code = pending.issued.dev_code.clone().unwrap();

    let second = ctx
        .state
        .agreements
        .resend_challenge(agreement_id, subject, ContactChannel::Email)
        .await
        .unwrap();
    assert_ne!(second.challenge.challenge_id, pending.issued.challenge.challenge_id);

    let first = ctx
        .store
        .find_challenge(pending.issued.challenge.challenge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, ChallengeStatus::Expired);

    let stale = ctx
        .state
        .agreements
        .verification()
        .verify(
            pending.issued.challenge.challenge_id,
            agreement_id,
            subject,
            &first_code,
        )
        .await;
    assert!(matches!(stale, Err(ServiceError::Expired)));

    // Latest-challenge fallback picks the resent code
    let verified = ctx
        .state
        .agreements
        .verification()
        .verify_latest(agreement_id, subject, &second.dev_code.unwrap())
        .await
        .unwrap();
    assert_eq!(verified.challenge_id, second.challenge.challenge_id);
}

#[tokio::test]
async fn test_dispatch_failure_leaves_no_usable_challenge() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let agreement = ctx
        .state
        .agreements
        .create_draft(platform_draft(subject))
        .await
        .unwrap();

    ctx.dispatcher.set_failing(true);
    let result = ctx
        .state
        .agreements
        .verification()
        .issue(
            agreement.agreement_id,
            subject,
            ContactChannel::Email,
            &Recipients {
                email: agreement.contact_email.clone(),
                ..Recipients::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ServiceError::DependencyFailure(_))));

    let latest = ctx
        .store
        .find_latest_pending_challenge(agreement.agreement_id, subject)
        .await
        .unwrap();
    assert!(latest.is_none());
}

#[tokio::test]
async fn test_sms_channel_requires_phone() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let agreement = ctx
        .state
        .agreements
        .create_draft(platform_draft(subject))
        .await
        .unwrap();

    let result = ctx
        .state
        .agreements
        .resend_challenge(agreement.agreement_id, subject, ContactChannel::Sms)
        .await;
    assert!(result.is_err());
    assert!(ctx.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_code_hidden_outside_development() {
    let mut config = common::test_config();
    config.verification.expose_codes = false;
    let ctx = TestContext::with_config(config).await;

    let pending = ctx.submit(platform_draft(Uuid::new_v4())).await;
    assert!(pending.issued.dev_code.is_none());
    assert_eq!(pending.issued.challenge.code_hash.len(), 64);

    // The code still went out through the dispatcher
    let sent = ctx.dispatcher.last().unwrap();
    assert_eq!(sent.channel, ContactChannel::Email);
    assert!(sent.payload.sms_text.contains("verification code"));
}

#[tokio::test]
async fn test_latest_pending_challenge_breaks_timestamp_ties_by_id() {
    let ctx = TestContext::new().await;
    let agreement_id = Uuid::new_v4();
    let subject = Uuid::new_v4();
    let created = Utc::now();

    let challenge = |id: u128, created_utc| -> VerificationChallenge {
        NewChallenge {
            challenge_id: Uuid::from_u128(id),
            agreement_id,
            subject_user_id: subject,
            contact_channel: ContactChannel::Email,
            code_hash: "0".repeat(64),
            purpose: ChallengePurpose::AgreementSignature,
            attempt_limit: 5,
            expires_utc: created + Duration::minutes(10),
        }
        .into_challenge(created_utc)
    };

    ctx.store.import_challenge(challenge(2, created)).await;
    ctx.store.import_challenge(challenge(1, created)).await;
    // Larger id but older: loses on the timestamp
    ctx.store
        .import_challenge(challenge(3, created - Duration::seconds(1)))
        .await;

    let latest = ctx
        .store
        .find_latest_pending_challenge(agreement_id, subject)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.challenge_id, Uuid::from_u128(2));

    let other_subject = ctx
        .store
        .find_latest_pending_challenge(agreement_id, Uuid::new_v4())
        .await
        .unwrap();
    assert!(other_subject.is_none());
}
