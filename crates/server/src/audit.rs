use propbot_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the process log. Failed and rejected outcomes are logged at warn.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session = event.session.as_ref().map(ToString::to_string).unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        let category = format!("{:?}", event.category);

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                event_id = %event.event_id,
                category = %category,
                actor = %event.actor,
                session = %session,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                event_id = %event.event_id,
                category = %category,
                actor = %event.actor,
                session = %session,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
