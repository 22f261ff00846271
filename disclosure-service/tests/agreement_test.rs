//! Agreement lifecycle: drafting, activation, supersession, revocation, delivery.

mod common;

use chrono::Duration;
use common::{platform_draft, project_draft, TestContext, COMPLIANCE_CC};
use disclosure_service::models::{
    AgreementScope, AgreementStatus, ContactChannel, ContactInfo, DeliveryStatus,
};
use disclosure_service::services::{DisclosureStore, ServiceError};
use uuid::Uuid;

#[tokio::test]
async fn test_draft_rejects_invalid_input() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();

    let mut empty_signature = platform_draft(subject);
    empty_signature.signature_artifact = "   ".to_string();

    let mut project_without_id = platform_draft(subject);
    project_without_id.scope = AgreementScope::Project;

    let platform_with_project = {
        let mut d = project_draft(subject, Uuid::new_v4());
        d.scope = AgreementScope::Platform;
        d
    };

    let mut bad_email = platform_draft(subject);
    bad_email.contact.email = Some("not-an-email".to_string());

    let mut bad_phone = platform_draft(subject);
    bad_phone.contact.phone = Some("0044 20 7946".to_string());

    let mut no_contact = platform_draft(subject);
    no_contact.contact = ContactInfo::default();

    for draft in [
        empty_signature,
        project_without_id,
        platform_with_project,
        bad_email,
        bad_phone,
        no_contact,
    ] {
        let result = ctx.state.agreements.create_draft(draft).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    let stats = ctx.state.agreements.statistics(None).await.unwrap();
    assert_eq!(stats.total, 0);
}

#[tokio::test]
async fn test_draft_with_unknown_template_is_not_found() {
    let ctx = TestContext::new().await;
    let mut draft = platform_draft(Uuid::new_v4());
    draft.template_id = Some(Uuid::new_v4());

    let result = ctx.state.agreements.create_draft(draft).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_draft_snapshots_template_text() {
    let ctx = TestContext::new().await;
    let agreement = ctx
        .state
        .agreements
        .create_draft(platform_draft(Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(agreement.status, AgreementStatus::PendingVerification);
    assert!(!agreement.verified);
    assert!(agreement.version_text.contains("Standard NDA (v1)"));
    assert_eq!(agreement.device_type.as_deref(), Some("desktop"));
    assert_eq!(agreement.browser.as_deref(), Some("chrome"));
}

#[tokio::test]
async fn test_signing_activates_and_delivers_confirmation() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();

    let agreement = ctx.sign(platform_draft(subject)).await;
    assert_eq!(agreement.status, AgreementStatus::Active);
    assert!(agreement.verified);
    assert!(agreement.verified_utc.is_some());

    let delivered = ctx.wait_for_delivery(agreement.agreement_id).await;
    assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);

    let confirmation = ctx.dispatcher.last().unwrap();
    assert_eq!(confirmation.channel, ContactChannel::Email);
    assert_eq!(confirmation.recipients.cc, vec![COMPLIANCE_CC.to_string()]);
    let attachment = confirmation.payload.attachment.expect("document attached");
    let text = String::from_utf8(attachment.body).unwrap();
    assert!(text.contains(&agreement.agreement_id.to_string()));
    assert!(!text.contains(&agreement.signature_artifact));
}

#[tokio::test]
async fn test_confirm_requires_owner_and_pending_status() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;
    let code = pending.issued.dev_code.clone().unwrap();

    let stranger = ctx
        .state
        .agreements
        .confirm_signature(pending.agreement.agreement_id, Uuid::new_v4(), None, &code)
        .await;
    assert!(matches!(stranger, Err(ServiceError::NotFound(_))));

    ctx.state
        .agreements
        .confirm_signature(pending.agreement.agreement_id, subject, None, &code)
        .await
        .unwrap();

    let twice = ctx
        .state
        .agreements
        .confirm_signature(pending.agreement.agreement_id, subject, None, &code)
        .await;
    assert!(matches!(twice, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_new_activation_supersedes_previous() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();

    let first = ctx.sign(platform_draft(subject)).await;
    let second = ctx.sign(platform_draft(subject)).await;

    let first = ctx
        .store
        .find_agreement(first.agreement_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, AgreementStatus::Superseded);

    let active = ctx
        .state
        .agreements
        .get_active_agreement(subject, AgreementScope::Platform, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.agreement_id, second.agreement_id);
}

#[tokio::test]
async fn test_project_agreements_are_keyed_per_project() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let project_a = Uuid::new_v4();
    let project_b = Uuid::new_v4();

    let a = ctx.sign(project_draft(subject, project_a)).await;
    let b = ctx.sign(project_draft(subject, project_b)).await;

    for (project, expected) in [(project_a, a.agreement_id), (project_b, b.agreement_id)] {
        let active = ctx
            .state
            .agreements
            .get_active_agreement(subject, AgreementScope::Project, Some(project))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.agreement_id, expected);
    }

    let platform = ctx
        .state
        .agreements
        .get_active_agreement(subject, AgreementScope::Platform, None)
        .await
        .unwrap();
    assert!(platform.is_none());
}

#[tokio::test]
async fn test_duplicate_active_agreements_resolve_to_newest() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let signed = ctx.sign(platform_draft(subject)).await;

    let mut newer = signed.clone();
    newer.agreement_id = Uuid::new_v4();
    newer.created_utc = signed.created_utc + Duration::seconds(5);
    ctx.store.import_agreement(newer.clone()).await;

    let active = ctx
        .state
        .agreements
        .get_active_agreement(subject, AgreementScope::Platform, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.agreement_id, newer.agreement_id);
}

#[tokio::test]
async fn test_revoke_is_idempotent_and_requires_reason() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let agreement = ctx.sign(platform_draft(subject)).await;

    let no_reason = ctx
        .state
        .agreements
        .revoke(agreement.agreement_id, admin, "  ")
        .await;
    assert!(matches!(no_reason, Err(ServiceError::Validation(_))));

    let revoked = ctx
        .state
        .agreements
        .revoke(agreement.agreement_id, admin, "Breach of terms")
        .await
        .unwrap();
    assert_eq!(revoked.status, AgreementStatus::Revoked);
    let stamp = revoked.revocation().unwrap();
    assert_eq!(stamp.actor_id, admin);
    assert_eq!(stamp.reason, "Breach of terms");

    let again = ctx
        .state
        .agreements
        .revoke(agreement.agreement_id, Uuid::new_v4(), "Second attempt")
        .await
        .unwrap();
    assert_eq!(again.revocation(), Some(stamp));

    let active = ctx
        .state
        .agreements
        .get_active_agreement(subject, AgreementScope::Platform, None)
        .await
        .unwrap();
    assert!(active.is_none());
}

#[tokio::test]
async fn test_pending_agreement_cannot_be_revoked() {
    let ctx = TestContext::new().await;
    let pending = ctx.submit(platform_draft(Uuid::new_v4())).await;

    let result = ctx
        .state
        .agreements
        .revoke(pending.agreement.agreement_id, Uuid::new_v4(), "Not yet signed")
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let missing = ctx
        .state
        .agreements
        .revoke(Uuid::new_v4(), Uuid::new_v4(), "Unknown")
        .await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_failed_delivery_is_recorded_and_resendable() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    let pending = ctx.submit(platform_draft(subject)).await;

    ctx.dispatcher.set_failing(true);
    let agreement = ctx
        .state
        .agreements
        .confirm_signature(
            pending.agreement.agreement_id,
            subject,
            Some(pending.issued.challenge.challenge_id),
            &pending.issued.dev_code.unwrap(),
        )
        .await
        .unwrap();
    // Activation stands even though the confirmation failed
    assert_eq!(agreement.status, AgreementStatus::Active);

    let failed = ctx.wait_for_delivery(agreement.agreement_id).await;
    assert_eq!(failed.delivery_status, DeliveryStatus::Failed);
    assert!(failed.delivery_error.is_some());

    let undelivered = ctx.state.agreements.list_undelivered(10).await.unwrap();
    assert_eq!(undelivered.len(), 1);
    assert_eq!(undelivered[0].agreement_id, agreement.agreement_id);

    ctx.dispatcher.set_failing(false);
    let resent = ctx
        .state
        .agreements
        .resend_confirmation(agreement.agreement_id)
        .await
        .unwrap();
    assert_eq!(resent.delivery_status, DeliveryStatus::Delivered);
    assert!(resent.delivery_error.is_none());
    assert!(ctx.state.agreements.list_undelivered(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_statistics_group_by_status_and_device() {
    let ctx = TestContext::new().await;
    let subject = Uuid::new_v4();
    ctx.sign(platform_draft(subject)).await;
    ctx.submit(platform_draft(Uuid::new_v4())).await;

    let stats = ctx.state.agreements.statistics(None).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("active"), Some(&1));
    assert_eq!(stats.by_status.get("pending_verification"), Some(&1));
    assert_eq!(stats.by_device.get("desktop"), Some(&2));
    assert_eq!(stats.by_browser.get("chrome"), Some(&2));
}
