//! Persisted and exchanged data types for per-user two-factor state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a user's two-factor configuration.
///
/// Transitions are owned by the enrollment coordinator:
/// `Disabled → PendingVerification → Enabled`, `Enabled → Disabled`, and
/// `PendingVerification → Disabled` on cancellation. `Disabled → Enabled`
/// never happens directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStatus {
    Disabled,
    PendingVerification,
    Enabled,
}

impl TwoFactorStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::PendingVerification => "pending_verification",
            Self::Enabled => "enabled",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "disabled" => Some(Self::Disabled),
            "pending_verification" => Some(Self::PendingVerification),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }
}

/// An encrypted TOTP seed as held by the store.
///
/// `secret_id` is minted fresh on every setup attempt and bound into the
/// ciphertext AAD, so a stale ciphertext can never be replayed under a newer
/// configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedSecret {
    pub secret_id: Uuid,
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A single recovery code record. Plaintext is never stored; `code_hash` is
/// an Argon2id PHC string. `used` is monotonic: it only reverts by replacing
/// the whole set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredBackupCode {
    pub code_hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

/// Per-user two-factor configuration, exactly one per user.
///
/// `version` implements optimistic concurrency: every mutation bumps it by
/// one, and the store rejects writes whose expected version is stale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    pub user_id: Uuid,
    pub status: TwoFactorStatus,
    pub secret: Option<SealedSecret>,
    pub backup_codes: Vec<StoredBackupCode>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl TwoFactorConfig {
    /// Fresh configuration for a user with no prior two-factor state.
    /// Production writes start from `begin_setup`; this seeds store tests.
    #[must_use]
    pub(crate) fn disabled(user_id: Uuid) -> Self {
        Self {
            user_id,
            status: TwoFactorStatus::Disabled,
            secret: None,
            backup_codes: Vec::new(),
            enabled_at: None,
            version: 0,
        }
    }

    /// Count of recovery codes that are still redeemable.
    #[must_use]
    pub fn unused_backup_codes(&self) -> usize {
        self.backup_codes.iter().filter(|code| !code.used).count()
    }
}

/// Proof of re-authentication minted by the caller.
///
/// The engine does not re-authenticate; it only checks that the caller marked
/// the token valid for the acting user. How the proof was obtained (password,
/// valid TOTP) is the caller's business.
#[derive(Clone, Debug)]
pub struct ReauthToken {
    user_id: Uuid,
    validated: bool,
}

impl ReauthToken {
    /// Token for a re-authentication the caller has verified.
    #[must_use]
    pub fn validated(user_id: Uuid) -> Self {
        Self {
            user_id,
            validated: true,
        }
    }

    /// Token for a failed or unverified re-authentication attempt.
    #[must_use]
    pub fn unvalidated(user_id: Uuid) -> Self {
        Self {
            user_id,
            validated: false,
        }
    }

    #[must_use]
    pub fn is_valid_for(&self, user_id: Uuid) -> bool {
        self.validated && self.user_id == user_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{ReauthToken, StoredBackupCode, TwoFactorConfig, TwoFactorStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn status_round_trips() {
        for status in [
            TwoFactorStatus::Disabled,
            TwoFactorStatus::PendingVerification,
            TwoFactorStatus::Enabled,
        ] {
            assert_eq!(TwoFactorStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TwoFactorStatus::from_str("bogus"), None);
    }

    #[test]
    fn reauth_token_binds_user() {
        let user = Uuid::new_v4();
        assert!(ReauthToken::validated(user).is_valid_for(user));
        assert!(!ReauthToken::validated(user).is_valid_for(Uuid::new_v4()));
        assert!(!ReauthToken::unvalidated(user).is_valid_for(user));
    }

    // Same serde path the Postgres JSONB column goes through.
    #[test]
    fn backup_code_records_round_trip_through_json() {
        let record = StoredBackupCode {
            code_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            used: true,
            used_at: Some(Utc::now()),
            issued_at: Utc::now(),
        };

        let json = serde_json::to_string(&vec![record.clone()]).unwrap();
        let decoded: Vec<StoredBackupCode> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].code_hash, record.code_hash);
        assert!(decoded[0].used);
        assert_eq!(decoded[0].used_at, record.used_at);
        assert_eq!(decoded[0].issued_at, record.issued_at);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&TwoFactorStatus::PendingVerification).unwrap(),
            "\"pending_verification\""
        );
    }

    #[test]
    fn fresh_config_starts_disabled() {
        let config = TwoFactorConfig::disabled(Uuid::new_v4());
        assert_eq!(config.status, TwoFactorStatus::Disabled);
        assert!(config.secret.is_none());
        assert_eq!(config.unused_backup_codes(), 0);
        assert_eq!(config.version, 0);
    }
}
