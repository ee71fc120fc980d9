//! Audit seam for lifecycle events.
//!
//! The emitter receives event names, the acting user and a timestamp,
//! nothing else. Secrets, codes and hashes never cross this boundary.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Two-factor lifecycle events, names only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuditEvent {
    SetupStarted,
    TwoFactorEnabled,
    SetupCancelled,
    TwoFactorDisabled,
    BackupCodesRegenerated,
}

impl AuditEvent {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SetupStarted => "SetupStarted",
            Self::TwoFactorEnabled => "TwoFactorEnabled",
            Self::SetupCancelled => "SetupCancelled",
            Self::TwoFactorDisabled => "TwoFactorDisabled",
            Self::BackupCodesRegenerated => "BackupCodesRegenerated",
        }
    }
}

/// External audit collaborator. Implementations must tolerate being called
/// on hot paths; delivery failures are theirs to swallow or queue.
pub trait AuditEmitter: Send + Sync {
    fn emit(&self, event: AuditEvent, user_id: Uuid, at: DateTime<Utc>);
}

/// Emits audit events as structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditEmitter;

impl AuditEmitter for TracingAuditEmitter {
    fn emit(&self, event: AuditEvent, user_id: Uuid, at: DateTime<Utc>) {
        info!(event = event.name(), user_id = %user_id, at = %at, "two-factor audit event");
    }
}

/// Drops every event. For embedders that wire their own pipeline later.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditEmitter;

impl AuditEmitter for NoopAuditEmitter {
    fn emit(&self, _event: AuditEvent, _user_id: Uuid, _at: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::{AuditEmitter, AuditEvent, NoopAuditEmitter};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn event_names_are_stable() {
        assert_eq!(AuditEvent::TwoFactorEnabled.name(), "TwoFactorEnabled");
        assert_eq!(AuditEvent::TwoFactorDisabled.name(), "TwoFactorDisabled");
        assert_eq!(
            AuditEvent::BackupCodesRegenerated.name(),
            "BackupCodesRegenerated"
        );
    }

    #[test]
    fn noop_emitter_accepts_events() {
        NoopAuditEmitter.emit(AuditEvent::SetupStarted, Uuid::new_v4(), Utc::now());
    }
}
