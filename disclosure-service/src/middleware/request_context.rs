use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header::USER_AGENT, request::Parts};
use service_core::middleware::tracing::REQUEST_ID_HEADER;
use std::convert::Infallible;

use crate::models::{AuditContext, SignatureMetadata};

/// Network facts about the caller. Every field is best-effort.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn audit(&self) -> AuditContext {
        AuditContext {
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            request_id: self.request_id.clone(),
        }
    }

    pub fn signature_metadata(&self) -> SignatureMetadata {
        SignatureMetadata::capture(self.ip_address.clone(), self.user_agent.clone())
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // First hop of X-Forwarded-For is the client
        let ip_address = header(parts, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|v| !v.is_empty())
            .or_else(|| header(parts, "x-real-ip"));

        Ok(RequestContext {
            ip_address,
            user_agent: header(parts, USER_AGENT.as_str()),
            request_id: header(parts, REQUEST_ID_HEADER),
        })
    }
}
