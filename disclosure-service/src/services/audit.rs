use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{AccessLevel, AuditContext, AuditEventType, NewAuditRecord};
use crate::services::metrics::record_audit_write_failure;
use crate::services::DisclosureStore;

/// Access audit trail writer.
#[derive(Clone)]
pub struct AccessAuditLogger {
    store: Arc<dyn DisclosureStore>,
}

impl AccessAuditLogger {
    pub fn new(store: Arc<dyn DisclosureStore>) -> Self {
        Self { store }
    }

    /// Record an access event in the background (non-blocking).
    ///
    /// Failures are logged and counted, never returned. The handle only
    /// exists so tests can wait for the write.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        project_id: Uuid,
        subject_user_id: Option<Uuid>,
        resolved_level: AccessLevel,
        event_type: AuditEventType,
        content_type: Option<String>,
        content_id: Option<String>,
        context: AuditContext,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let record = NewAuditRecord {
            project_id,
            subject_user_id,
            resolved_level,
            event_type,
            content_type,
            content_id,
            context,
        };

        tokio::spawn(async move {
            if let Err(e) = store.insert_audit_record(record).await {
                record_audit_write_failure(event_type.as_str());
                tracing::error!(
                    error = %e,
                    project_id = %project_id,
                    event_type = %event_type,
                    "Failed to write access audit record"
                );
            }
        })
    }
}
