//! Test helper module for disclosure-service integration tests.
//!
//! Wires the full service graph over the in-memory store and a recording
//! dispatcher, so no database or mail server is needed.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{request::Builder, Request};
use chrono::Utc;
use disclosure_service::config::{
    DatabaseConfig, DisclosureConfig, Environment, GatewayConfig, NotificationConfig,
    SecurityConfig, VerificationConfig,
};
use disclosure_service::models::{
    AgreementScope, ConfidentialityAgreement, ContactChannel, ContactInfo, CreateTemplate,
    DeliveryStatus, GrantStatus, NegotiationGrant, SignatureMetadata,
};
use disclosure_service::services::{
    init_metrics, DisclosureStore, DraftRequest, FeeSchedule, InMemoryStore,
    PendingSignature, PlainTextDocumentGenerator, RecordingDispatcher,
};
use disclosure_service::{build_router, AppState};
use rust_decimal_macros::dec;
use service_core::config::Config as CoreConfig;
use service_core::observability::init_test_tracing;
use service_core::utils::signature::{generate_signature, SignedRequest};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const TEST_ADMIN_KEY: &str = "test-admin-key-0123456789";
pub const COMPLIANCE_CC: &str = "compliance@example.com";
pub const TEST_GATEWAY_CLIENT_ID: &str = "test-gateway";
pub const TEST_GATEWAY_SECRET: &str = "test-gateway-signing-secret";

pub fn test_config() -> DisclosureConfig {
    DisclosureConfig {
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        environment: Environment::Dev,
        service_name: "disclosure-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        verification: VerificationConfig {
            expiry_seconds: 600,
            attempt_limit: 5,
            code_length: 6,
            hash_secret: "test-otp-secret".to_string(),
            expose_codes: true,
            sweep_interval_seconds: 0,
        },
        fees: FeeSchedule::default(),
        notification: NotificationConfig {
            smtp: None,
            sms: None,
            compliance_cc: Some(COMPLIANCE_CC.to_string()),
        },
        security: SecurityConfig {
            admin_api_key: TEST_ADMIN_KEY.to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            gateway: GatewayConfig {
                client_id: TEST_GATEWAY_CLIENT_ID.to_string(),
                signing_secret: TEST_GATEWAY_SECRET.to_string(),
                require_signed_requests: false,
                max_clock_skew_seconds: 60,
            },
        },
    }
}

/// Service graph over in-memory collaborators.
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Builds the graph and seeds a default template.
    pub async fn with_config(config: DisclosureConfig) -> Self {
        init_test_tracing("warn");
        init_metrics();

        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let state = AppState::new(
            config,
            store.clone(),
            dispatcher.clone(),
            Arc::new(PlainTextDocumentGenerator),
        );

        state
            .agreements
            .create_template(CreateTemplate {
                name: "Standard NDA".to_string(),
                version_label: "v1".to_string(),
                body_text: "The signer agrees to keep project information confidential."
                    .to_string(),
                make_default: true,
            })
            .await
            .expect("Failed to seed default template");

        Self {
            state,
            store,
            dispatcher,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Submit a signature and return the pending agreement with its code.
    pub async fn submit(&self, draft: DraftRequest) -> PendingSignature {
        self.state
            .agreements
            .submit_signature(draft, ContactChannel::Email)
            .await
            .expect("Failed to submit signature")
    }

    /// Walk the whole signing flow and return the active agreement.
    pub async fn sign(&self, draft: DraftRequest) -> ConfidentialityAgreement {
        let pending = self.submit(draft).await;
        let code = pending.issued.dev_code.clone().expect("Codes are exposed in tests");
        self.state
            .agreements
            .confirm_signature(
                pending.agreement.agreement_id,
                pending.agreement.subject_user_id,
                Some(pending.issued.challenge.challenge_id),
                &code,
            )
            .await
            .expect("Failed to confirm signature")
    }

    /// Wait for the background confirmation to record a delivery outcome.
    pub async fn wait_for_delivery(&self, agreement_id: Uuid) -> ConfidentialityAgreement {
        for _ in 0..100 {
            let agreement = self
                .store
                .find_agreement(agreement_id)
                .await
                .expect("Store unavailable")
                .expect("Agreement missing");
            if agreement.delivery_status != DeliveryStatus::Pending {
                return agreement;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Delivery status never left pending for {}", agreement_id);
    }
}

pub fn platform_draft(subject_user_id: Uuid) -> DraftRequest {
    DraftRequest {
        subject_user_id,
        scope: AgreementScope::Platform,
        project_id: None,
        template_id: None,
        signature_artifact: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        contact: ContactInfo {
            email: Some("signer@example.com".to_string()),
            phone: None,
        },
        metadata: SignatureMetadata::capture(
            Some("203.0.113.7".to_string()),
            Some("Mozilla/5.0 (Macintosh) AppleWebKit/537.36 Chrome/120.0 Safari/537.36".to_string()),
        ),
    }
}

pub fn project_draft(subject_user_id: Uuid, project_id: Uuid) -> DraftRequest {
    DraftRequest {
        scope: AgreementScope::Project,
        project_id: Some(project_id),
        ..platform_draft(subject_user_id)
    }
}

pub fn active_grant(project_id: Uuid, investor_user_id: Uuid) -> NegotiationGrant {
    let now = Utc::now();
    NegotiationGrant {
        grant_id: Uuid::new_v4(),
        project_id,
        investor_user_id,
        deposit_amount: dec!(500.00),
        status: GrantStatus::Active,
        full_access: true,
        created_utc: now,
        updated_utc: now,
    }
}

/// A code of the right shape that is guaranteed not to match.
pub fn wrong_code(code: &str) -> String {
    code.chars()
        .map(|c| match c {
            '9' => '0',
            d => char::from(d as u8 + 1),
        })
        .collect()
}

/// Finish `builder` as the gateway would forward it: signed over the
/// method, path with query, caller identity and body.
pub fn signed(builder: Builder, user_id: Option<&str>, body: String) -> Request<Body> {
    let method = builder
        .method_ref()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "GET".to_string());
    let target = builder
        .uri_ref()
        .and_then(|uri| uri.path_and_query())
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let timestamp = Utc::now().timestamp();
    let nonce = Uuid::new_v4().to_string();

    let signature = generate_signature(
        TEST_GATEWAY_SECRET,
        &SignedRequest {
            method: &method,
            target: &target,
            timestamp,
            nonce: &nonce,
            identity: user_id.unwrap_or(""),
            body: body.as_bytes(),
        },
    )
    .unwrap();

    let mut builder = builder
        .header("X-Client-ID", TEST_GATEWAY_CLIENT_ID)
        .header("X-Timestamp", timestamp.to_string())
        .header("X-Nonce", nonce)
        .header("X-Signature", signature);
    if let Some(user_id) = user_id {
        builder = builder.header("X-User-ID", user_id);
    }
    builder.body(Body::from(body)).unwrap()
}
