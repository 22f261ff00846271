use service_core::error::AppError;
use thiserror::Error;

/// Failure taxonomy of the disclosure core.
///
/// Every variant has exactly one user-facing message (`user_message`); the
/// `Display` text carries internal detail for logs.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Verification code expired")]
    Expired,

    #[error("Verification attempts exceeded")]
    AttemptsExceeded,

    #[error("Verification code mismatch ({remaining_attempts} attempts left)")]
    CodeMismatch { remaining_attempts: i32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn database(context: &str, err: impl std::fmt::Display) -> Self {
        ServiceError::Database(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Stable machine-readable code for clients and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Expired => "expired",
            ServiceError::AttemptsExceeded => "attempts_exceeded",
            ServiceError::CodeMismatch { .. } => "code_mismatch",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::DependencyFailure(_) => "dependency_failure",
            ServiceError::Database(_) => "database_error",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => {
                "We could not find that request. Please start the signing process again."
            }
            ServiceError::Expired => "This code has expired. Please request a new code.",
            ServiceError::AttemptsExceeded => {
                "Too many incorrect attempts. Please request a new code."
            }
            ServiceError::CodeMismatch { .. } => "The code you entered is incorrect. Please try again.",
            ServiceError::Validation(_) => "Some of the submitted information is invalid.",
            ServiceError::DependencyFailure(_) => {
                "We could not deliver a message right now. Our team has been notified."
            }
            ServiceError::Database(_) => "Something went wrong on our side. Please try again later.",
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.user_message().to_string();
        match err {
            ServiceError::NotFound(_) => AppError::NotFound(message),
            ServiceError::Expired => AppError::Gone(message),
            ServiceError::AttemptsExceeded => AppError::TooManyRequests(message, None),
            // The mismatch that used the last attempt closed the challenge
            ServiceError::CodeMismatch {
                remaining_attempts: 0,
            } => AppError::TooManyRequests(
                ServiceError::AttemptsExceeded.user_message().to_string(),
                None,
            ),
            ServiceError::CodeMismatch { remaining_attempts } => AppError::Unauthorized(format!(
                "{} Attempts remaining: {}.",
                message, remaining_attempts
            )),
            ServiceError::Validation(detail) => {
                AppError::Unprocessable(format!("{} {}", message, detail))
            }
            ServiceError::DependencyFailure(_) => AppError::BadGateway(message),
            ServiceError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::collections::HashSet;

    fn all_kinds() -> Vec<ServiceError> {
        vec![
            ServiceError::NotFound("agreement".into()),
            ServiceError::Expired,
            ServiceError::AttemptsExceeded,
            ServiceError::CodeMismatch {
                remaining_attempts: 2,
            },
            ServiceError::Validation("signature".into()),
            ServiceError::DependencyFailure("smtp".into()),
            ServiceError::Database(anyhow::anyhow!("connection reset")),
        ]
    }

    #[test]
    fn test_each_kind_has_a_distinct_message() {
        let kinds = all_kinds();
        let messages: HashSet<_> = kinds.iter().map(|e| e.user_message()).collect();
        let codes: HashSet<_> = kinds.iter().map(|e| e.code()).collect();
        assert_eq!(messages.len(), kinds.len());
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_mismatch_reports_remaining_attempts() {
        let retry: AppError = ServiceError::CodeMismatch {
            remaining_attempts: 2,
        }
        .into();
        assert_eq!(retry.status_code(), StatusCode::UNAUTHORIZED);
        assert!(retry.to_string().contains("Attempts remaining: 2"));

        let last: AppError = ServiceError::CodeMismatch {
            remaining_attempts: 0,
        }
        .into();
        assert_eq!(last.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(last.to_string().contains("request a new code"));
    }

    #[test]
    fn test_expired_and_exhausted_map_to_different_statuses() {
        let expired: AppError = ServiceError::Expired.into();
        let exhausted: AppError = ServiceError::AttemptsExceeded.into();
        assert_ne!(expired.status_code(), exhausted.status_code());
    }
}
