use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// Authenticated caller, taken from the `X-User-ID` header. The header is
/// only trusted when the request signature is valid, which the gateway
/// signature middleware enforces before any handler runs. Requests without
/// it are rejected.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

/// Optional caller. A missing header means an anonymous viewer; a
/// malformed one is rejected rather than silently treated as anonymous.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<Uuid>);

fn parse_user_id(parts: &Parts) -> Result<Option<Uuid>, AppError> {
    let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    let user_id = raw
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Malformed X-User-ID header")))?;

    tracing::Span::current().record("user_id", tracing::field::display(user_id));
    Ok(Some(user_id))
}

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_user_id(parts)?
            .map(UserId)
            .ok_or_else(|| AppError::Unauthorized("Missing X-User-ID header".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(parse_user_id(parts)?))
    }
}
