//! Viewer tier resolution.
//!
//! Resolution fails closed: any persistence error yields
//! [`AccessLevel::LEAST_PRIVILEGED`] with the error handed back separately,
//! never a privileged level.

use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::models::AccessLevel;
use crate::services::metrics::record_access_resolution;
use crate::services::{DisclosureStore, ServiceError};

/// Resolved level plus the failure, if resolution had to fall back.
#[derive(Debug)]
pub struct AccessResolution {
    pub level: AccessLevel,
    pub failure: Option<ServiceError>,
}

impl AccessResolution {
    fn granted(level: AccessLevel) -> Self {
        Self {
            level,
            failure: None,
        }
    }

    fn fail_closed(error: ServiceError) -> Self {
        Self {
            level: AccessLevel::LEAST_PRIVILEGED,
            failure: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct AccessLevelResolver {
    store: Arc<dyn DisclosureStore>,
}

impl AccessLevelResolver {
    pub fn new(store: Arc<dyn DisclosureStore>) -> Self {
        Self { store }
    }

    /// Negotiator needs an active agreement covering the project and an
    /// active full-access grant; neither alone escalates past registered.
    #[instrument(skip(self))]
    pub async fn resolve(&self, subject_user_id: Option<Uuid>, project_id: Uuid) -> AccessResolution {
        let Some(subject_user_id) = subject_user_id else {
            record_access_resolution(AccessLevel::Public.as_str(), "anonymous");
            return AccessResolution::granted(AccessLevel::Public);
        };

        let resolution = match self.lookup(subject_user_id, project_id).await {
            Ok(level) => AccessResolution::granted(level),
            Err(e) => {
                warn!(error = %e, "Access resolution failed, serving public view");
                AccessResolution::fail_closed(e)
            }
        };

        record_access_resolution(
            resolution.level.as_str(),
            if resolution.failure.is_some() { "failed" } else { "ok" },
        );
        resolution
    }

    async fn lookup(&self, subject_user_id: Uuid, project_id: Uuid) -> Result<AccessLevel, ServiceError> {
        let agreements = self
            .store
            .list_active_agreements_for_subject(subject_user_id)
            .await?;
        let has_agreement = agreements
            .iter()
            .any(|a| a.is_active() && a.covers_project(project_id));

        if !has_agreement {
            return Ok(AccessLevel::Public);
        }

        let grants = self
            .store
            .find_negotiation_grants(project_id, subject_user_id)
            .await?;
        if grants.iter().any(|g| g.grants_full_access()) {
            return Ok(AccessLevel::Negotiator);
        }

        Ok(AccessLevel::Registered)
    }
}
