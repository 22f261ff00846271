pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    signature::{signature_validation_middleware, SignatureConfig, SignatureStore},
    tracing::request_id_middleware,
};
use subtle::ConstantTimeEq;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::DisclosureConfig;
use crate::middleware::user_id::USER_ID_HEADER;
use crate::services::{
    AccessAuditLogger, AccessLevelResolver, ConfidentialityAgreementManager, DisclosureStore,
    DocumentGenerator, FeeCalculator, NotificationDispatcher, ProjectViewProjector,
    VerificationChallengeService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: DisclosureConfig,
    pub store: Arc<dyn DisclosureStore>,
    pub resolver: AccessLevelResolver,
    pub projector: ProjectViewProjector,
    pub audit: AccessAuditLogger,
    pub agreements: ConfidentialityAgreementManager,
    pub fees: FeeCalculator,
    pub signature_config: SignatureConfig,
}

impl AppState {
    /// Wire every service over one store and one dispatcher.
    pub fn new(
        config: DisclosureConfig,
        store: Arc<dyn DisclosureStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        documents: Arc<dyn DocumentGenerator>,
    ) -> Self {
        let verification = VerificationChallengeService::new(
            store.clone(),
            dispatcher.clone(),
            config.verification.clone(),
            config.codes_exposed(),
        );
        let agreements = ConfidentialityAgreementManager::new(
            store.clone(),
            verification,
            dispatcher,
            documents,
            config.notification.compliance_cc.clone(),
        );

        let signature_config = SignatureConfig {
            require_signatures: config.security.gateway.require_signed_requests,
            identity_header: USER_ID_HEADER,
            max_skew_seconds: config.security.gateway.max_clock_skew_seconds,
            excluded_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/metrics".to_string(),
            ],
        };

        Self {
            resolver: AccessLevelResolver::new(store.clone()),
            projector: ProjectViewProjector,
            audit: AccessAuditLogger::new(store.clone()),
            agreements,
            fees: FeeCalculator::new(config.fees.clone()),
            signature_config,
            store,
            config,
        }
    }
}

impl AsRef<SignatureConfig> for AppState {
    fn as_ref(&self) -> &SignatureConfig {
        &self.signature_config
    }
}

#[axum::async_trait]
impl SignatureStore for AppState {
    async fn claim_nonce(&self, nonce: &str, ttl_seconds: i64) -> Result<bool, AppError> {
        let now = Utc::now();
        let expires_utc = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Nonce window out of range")))?;
        Ok(self.store.claim_nonce(nonce, expires_utc, now).await?)
    }

    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError> {
        let gateway = &self.config.security.gateway;
        let known: bool = client_id
            .as_bytes()
            .ct_eq(gateway.client_id.as_bytes())
            .into();
        Ok(known.then(|| gateway.signing_secret.clone()))
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-admin-api-key"),
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-client-id"),
            HeaderName::from_static("x-timestamp"),
            HeaderName::from_static("x-nonce"),
            HeaderName::from_static("x-signature"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/agreements/undelivered",
            get(handlers::admin::list_undelivered),
        )
        .route("/admin/statistics", get(handlers::admin::agreement_statistics))
        .route(
            "/admin/agreements/:agreement_id/revoke",
            post(handlers::admin::revoke_agreement),
        )
        .route(
            "/admin/agreements/:agreement_id/resend-confirmation",
            post(handlers::admin::resend_confirmation),
        )
        .route(
            "/admin/templates",
            get(handlers::admin::list_templates).post(handlers::admin::create_template),
        )
        .route(
            "/admin/templates/:template_id/default",
            post(handlers::admin::set_default_template),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_endpoint))
        .route("/projects/:project_id", get(handlers::projects::get_project))
        .route(
            "/projects/:project_id/downloads/:content_id",
            post(handlers::projects::record_download),
        )
        .route("/agreements", post(handlers::agreements::submit_agreement))
        .route(
            "/agreements/active",
            get(handlers::agreements::get_active_agreement),
        )
        .route(
            "/agreements/:agreement_id/challenges",
            post(handlers::agreements::resend_challenge),
        )
        .route(
            "/agreements/:agreement_id/verify",
            post(handlers::agreements::verify_agreement),
        )
        .route("/fees/quote", get(handlers::fees::quote_fees))
        .route("/fees/refund", get(handlers::fees::quote_refund))
        .merge(admin_routes)
        .layer(from_fn_with_state(
            state.clone(),
            signature_validation_middleware::<AppState>,
        ))
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}
