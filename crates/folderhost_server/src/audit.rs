use folderhost_core::audit::{AuditEntry, AuditLog};
use tracing::info;

/// Writes audit entries as structured `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn create_log(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            username = %entry.username,
            action = %entry.action,
            created_at = %entry.created_at.to_rfc3339(),
            "{}",
            entry.description
        );
    }
}
