//! Gateway request signatures.
//!
//! A forwarded caller identity header is only trusted when the request
//! carries a valid gateway signature over it. Unsigned requests without an
//! identity pass through unless `require_signatures` is set.

use crate::error::AppError;
use crate::utils::signature::{SignedRequest, verify_signature};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;

pub const CLIENT_ID_HEADER: &str = "X-Client-ID";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const NONCE_HEADER: &str = "X-Nonce";
pub const SIGNATURE_HEADER: &str = "X-Signature";

pub const MAX_NONCE_LENGTH: usize = 128;

#[derive(Clone, Debug)]
pub struct SignatureConfig {
    /// Reject every unsigned request, not only those asserting an identity.
    pub require_signatures: bool,
    /// Header carrying the caller identity the gateway vouches for.
    pub identity_header: &'static str,
    /// Allowed clock difference between gateway and service.
    pub max_skew_seconds: i64,
    pub excluded_paths: Vec<String>,
}

#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Record a nonce; `false` when it was already seen within `ttl_seconds`.
    async fn claim_nonce(&self, nonce: &str, ttl_seconds: i64) -> Result<bool, AppError>;
    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError>;
}

pub async fn signature_validation_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: AsRef<SignatureConfig> + SignatureStore + Clone + Send + Sync + 'static,
{
    let config = state.as_ref();
    let path = req.uri().path();

    if config.excluded_paths.iter().any(|p| path == p) {
        return Ok(next.run(req).await);
    }

    let has_identity = req.headers().contains_key(config.identity_header);
    let has_signature = req.headers().contains_key(SIGNATURE_HEADER);
    if !config.require_signatures && !has_identity && !has_signature {
        return Ok(next.run(req).await);
    }

    let headers = req.headers();
    let client_id = get_header(headers, CLIENT_ID_HEADER)?;
    let timestamp_str = get_header(headers, TIMESTAMP_HEADER)?;
    let nonce = get_header(headers, NONCE_HEADER)?;
    let signature = get_header(headers, SIGNATURE_HEADER)?;
    let identity = match headers.get(config.identity_header) {
        Some(value) => value.to_str().map(str::to_string).map_err(|_| {
            AppError::Unauthorized(format!("Invalid header format: {}", config.identity_header))
        })?,
        None => String::new(),
    };

    if nonce.is_empty() || nonce.len() > MAX_NONCE_LENGTH {
        return Err(AppError::Unauthorized("Invalid nonce".to_string()));
    }

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid timestamp format".to_string()))?;

    let now = chrono::Utc::now().timestamp();
    let within_window = now
        .checked_sub(timestamp)
        .is_some_and(|skew| skew.unsigned_abs() <= config.max_skew_seconds.unsigned_abs());
    if !within_window {
        return Err(AppError::Unauthorized("Request timestamp expired".to_string()));
    }

    let secret = state
        .get_signing_secret(&client_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid client id".to_string()))?;

    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Failed to read body: {}", e)))?
        .to_bytes();

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    let signed = SignedRequest {
        method: parts.method.as_str(),
        target,
        timestamp,
        nonce: &nonce,
        identity: &identity,
        body: &bytes,
    };
    let is_valid = verify_signature(&secret, &signed, &signature)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Signature verification error: {}", e)))?;

    if !is_valid {
        tracing::warn!(client_id = %client_id, "Rejected request with invalid gateway signature");
        return Err(AppError::Unauthorized("Invalid signature".to_string()));
    }

    // Only authentic requests claim a nonce
    if !state
        .claim_nonce(&nonce, config.max_skew_seconds.saturating_mul(2))
        .await?
    {
        return Err(AppError::Unauthorized("Replay detected (nonce used)".to_string()));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

fn get_header(headers: &HeaderMap, key: &str) -> Result<String, AppError> {
    headers
        .get(key)
        .ok_or_else(|| AppError::Unauthorized(format!("Missing header: {}", key)))?
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| AppError::Unauthorized(format!("Invalid header format: {}", key)))
}
