//! Enrollment coordination: the two-factor state machine.
//!
//! Flow Overview:
//! 1) `begin_setup` mints a fresh secret, persists it as pending, and hands
//!    back the provisioning material; any unconfirmed prior secret is
//!    discarded (no stacking).
//! 2) `confirm_setup` verifies the first code, then finalizes in one store
//!    write: backup codes issued, status `Enabled`, `TwoFactorEnabled`
//!    emitted.
//! 3) Later logins call `verify` or `redeem_backup_code`.
//! 4) `disable` requires a caller-validated re-authentication proof and is
//!    idempotent; `cancel` abandons a pending setup.
//!
//! Security boundaries:
//! - Seeds are sealed before they reach the store and decrypted only for
//!   the duration of a verification.
//! - Backup-code plaintext is returned exactly once, at issuance.
//! - Failed verifications are throttled per user (separately for login and
//!   enrollment) and reported as a bare "invalid code".
//! - Concurrent writers are serialized by store versioning: lose once,
//!   retry once, then surface `ConcurrentModification`.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEmitter, AuditEvent};
use crate::backup::{BackupCodeBatch, normalize_backup_code, verify_backup_code};
use crate::config::EngineConfig;
use crate::crypto;
use crate::error::{Result, TwoFactorError};
use crate::models::{ReauthToken, SealedSecret, TwoFactorConfig, TwoFactorStatus};
use crate::provisioner;
use crate::rate_limit::{AttemptTracker, enroll_key, login_key};
use crate::store::TwoFactorStateStore;
use crate::verifier;

/// Optimistic-concurrency losers get exactly one more try.
const SAVE_ATTEMPTS: u32 = 2;

/// Provisioning material returned by [`EnrollmentCoordinator::begin_setup`].
/// Displayed to the user (typically as a QR code) and never logged.
#[derive(Clone)]
pub struct SetupStart {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

impl std::fmt::Debug for SetupStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupStart")
            .field("secret_base32", &"[REDACTED]")
            .field("provisioning_uri", &"[REDACTED]")
            .finish()
    }
}

/// Orchestrates provisioning, verification, backup codes, store and audit.
pub struct EnrollmentCoordinator {
    config: EngineConfig,
    store: Arc<dyn TwoFactorStateStore>,
    audit: Arc<dyn AuditEmitter>,
    attempts: AttemptTracker,
}

impl EnrollmentCoordinator {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TwoFactorStateStore>,
        audit: Arc<dyn AuditEmitter>,
    ) -> Self {
        let attempts = AttemptTracker::new(config.failure_limit(), config.failure_window());
        Self {
            config,
            store,
            audit,
            attempts,
        }
    }

    /// Starts (or restarts) enrollment for `user_id`.
    ///
    /// Moves the configuration to `PendingVerification` with a fresh secret,
    /// replacing any unconfirmed one. `account_label` becomes the account
    /// shown in authenticator apps.
    ///
    /// # Errors
    /// `EntropySource` when no secure randomness is available (fatal, caller
    /// retries); `ConcurrentModification` after losing the store race twice.
    pub async fn begin_setup(&self, user_id: Uuid, account_label: &str) -> Result<SetupStart> {
        let secret = provisioner::generate_secret()?;
        let ciphertext = crypto::encrypt_seed(
            self.config.seed_key(),
            secret.seed(),
            user_id,
            secret.secret_id,
        )?;
        let sealed = SealedSecret {
            secret_id: secret.secret_id,
            ciphertext,
            created_at: secret.created_at,
        };

        for _ in 0..SAVE_ATTEMPTS {
            let expected = match self.store.load(user_id).await? {
                Some(existing) => existing.version,
                None => 0,
            };
            let pending = TwoFactorConfig {
                user_id,
                status: TwoFactorStatus::PendingVerification,
                secret: Some(sealed.clone()),
                backup_codes: Vec::new(),
                enabled_at: None,
                version: expected + 1,
            };
            match self.store.save(&pending, expected).await {
                Ok(()) => {
                    self.emit(AuditEvent::SetupStarted, user_id);
                    info!(user_id = %user_id, "two-factor setup started");
                    let secret_base32 = secret.base32();
                    let provisioning_uri = provisioner::provisioning_uri(
                        &secret_base32,
                        account_label,
                        self.config.issuer(),
                    );
                    return Ok(SetupStart {
                        secret_base32,
                        provisioning_uri,
                    });
                }
                Err(TwoFactorError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    /// Confirms a pending enrollment with the user's first code.
    ///
    /// On success the configuration becomes `Enabled` in a single store
    /// write and the ten backup codes are returned, the only time their
    /// plaintext exists outside the user's hands.
    ///
    /// # Errors
    /// `NotFound` without a pending setup; `InvalidFormat` for malformed
    /// input; `InvalidCode` when the code does not verify (state unchanged,
    /// user retries); `RateLimited` after repeated failures.
    pub async fn confirm_setup(&self, user_id: Uuid, code: &str) -> Result<Vec<String>> {
        let key = enroll_key(user_id);
        self.attempts.check(&key).await?;

        let config = self.load_config(user_id).await?;
        if config.status != TwoFactorStatus::PendingVerification {
            return Err(TwoFactorError::NotFound);
        }
        let sealed = config.secret.clone().ok_or(TwoFactorError::NotFound)?;

        let seed = self.open_seed(&config)?;
        if !verifier::verify(&seed, code)? {
            self.attempts.record_failure(&key).await;
            warn!(user_id = %user_id, "enrollment confirmation failed: code did not verify");
            return Err(TwoFactorError::InvalidCode);
        }
        self.attempts.record_success(&key).await;

        let batch = BackupCodeBatch::generate(self.config.recovery_pepper())?;

        let mut expected = config.version;
        for _ in 0..SAVE_ATTEMPTS {
            let enabled = TwoFactorConfig {
                user_id,
                status: TwoFactorStatus::Enabled,
                secret: Some(sealed.clone()),
                backup_codes: batch.records.clone(),
                enabled_at: Some(Utc::now()),
                version: expected + 1,
            };
            match self.store.save(&enabled, expected).await {
                Ok(()) => {
                    self.emit(AuditEvent::TwoFactorEnabled, user_id);
                    info!(user_id = %user_id, "two-factor enabled");
                    return Ok(batch.codes);
                }
                Err(TwoFactorError::Conflict) => {
                    // Lost a race, most likely against a fresh begin_setup.
                    // If the pending secret changed, this confirmation
                    // targeted a stale secret and must fail like a wrong
                    // code would.
                    let current = self.load_config(user_id).await?;
                    let still_same_secret = current
                        .secret
                        .as_ref()
                        .is_some_and(|s| s.secret_id == sealed.secret_id);
                    if current.status != TwoFactorStatus::PendingVerification
                        || !still_same_secret
                    {
                        return Err(TwoFactorError::InvalidCode);
                    }
                    expected = current.version;
                }
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    /// Verifies a login-time code for an enabled configuration.
    ///
    /// # Errors
    /// `NotFound` unless two-factor is enabled for the user; `RateLimited`
    /// after five failures in the window; `InvalidFormat` / `InvalidCode`
    /// as for [`confirm_setup`](Self::confirm_setup).
    pub async fn verify(&self, user_id: Uuid, code: &str) -> Result<()> {
        let key = login_key(user_id);
        self.attempts.check(&key).await?;

        let config = self.load_enabled(user_id).await?;
        let seed = self.open_seed(&config)?;

        if verifier::verify(&seed, code)? {
            self.attempts.record_success(&key).await;
            Ok(())
        } else {
            self.attempts.record_failure(&key).await;
            warn!(user_id = %user_id, "two-factor verification failed");
            Err(TwoFactorError::InvalidCode)
        }
    }

    /// Redeems a single-use backup code.
    ///
    /// Exactly one of two concurrent redemptions of the same code succeeds;
    /// the loser retries the load/validate/save cycle once and then
    /// surfaces `ConcurrentModification`. Unknown and already-used codes are
    /// indistinguishable to the caller.
    ///
    /// # Errors
    /// `NotFound`, `RateLimited`, `InvalidCode`, `ConcurrentModification`.
    pub async fn redeem_backup_code(&self, user_id: Uuid, code: &str) -> Result<()> {
        let key = login_key(user_id);
        self.attempts.check(&key).await?;

        let Ok(normalized) = normalize_backup_code(code) else {
            self.attempts.record_failure(&key).await;
            return Err(TwoFactorError::InvalidCode);
        };

        for _ in 0..SAVE_ATTEMPTS {
            let config = self.load_enabled(user_id).await?;

            let mut matched = None;
            for (idx, record) in config.backup_codes.iter().enumerate() {
                if record.used {
                    continue;
                }
                if verify_backup_code(&normalized, &record.code_hash, self.config.recovery_pepper())?
                {
                    matched = Some(idx);
                    break;
                }
            }
            let Some(idx) = matched else {
                self.attempts.record_failure(&key).await;
                warn!(user_id = %user_id, "backup code redemption failed");
                return Err(TwoFactorError::InvalidCode);
            };

            let mut updated = config.clone();
            if let Some(record) = updated.backup_codes.get_mut(idx) {
                record.used = true;
                record.used_at = Some(Utc::now());
            }
            updated.version = config.version + 1;

            match self.store.save(&updated, config.version).await {
                Ok(()) => {
                    self.attempts.record_success(&key).await;
                    info!(
                        user_id = %user_id,
                        remaining = updated.unused_backup_codes(),
                        "backup code redeemed"
                    );
                    return Ok(());
                }
                Err(TwoFactorError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    /// Disables two-factor authentication, clearing the secret and all
    /// backup codes. Idempotent: disabling an absent or already-disabled
    /// configuration succeeds without effect.
    ///
    /// # Errors
    /// `ReauthRequired` unless `token` was marked valid for `user_id` by
    /// the caller; `ConcurrentModification` after losing the race twice.
    pub async fn disable(&self, user_id: Uuid, token: &ReauthToken) -> Result<()> {
        if !token.is_valid_for(user_id) {
            warn!(user_id = %user_id, "two-factor disable rejected: invalid re-auth proof");
            return Err(TwoFactorError::ReauthRequired);
        }

        for _ in 0..SAVE_ATTEMPTS {
            let Some(config) = self.store.load(user_id).await? else {
                return Ok(());
            };
            if config.status == TwoFactorStatus::Disabled {
                return Ok(());
            }
            let prior = config.status;

            let cleared = cleared_config(user_id, config.version + 1);
            match self.store.save(&cleared, config.version).await {
                Ok(()) => {
                    let event = if prior == TwoFactorStatus::Enabled {
                        AuditEvent::TwoFactorDisabled
                    } else {
                        AuditEvent::SetupCancelled
                    };
                    self.emit(event, user_id);
                    info!(user_id = %user_id, "two-factor disabled");
                    return Ok(());
                }
                Err(TwoFactorError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    /// Abandons a pending enrollment, discarding the unconfirmed secret.
    /// A no-op for absent, disabled or enabled configurations; an enabled
    /// secret is never touched by cancellation.
    ///
    /// # Errors
    /// `ConcurrentModification` after losing the store race twice.
    pub async fn cancel(&self, user_id: Uuid) -> Result<()> {
        for _ in 0..SAVE_ATTEMPTS {
            let Some(config) = self.store.load(user_id).await? else {
                return Ok(());
            };
            if config.status != TwoFactorStatus::PendingVerification {
                return Ok(());
            }

            let cleared = cleared_config(user_id, config.version + 1);
            match self.store.save(&cleared, config.version).await {
                Ok(()) => {
                    self.emit(AuditEvent::SetupCancelled, user_id);
                    info!(user_id = %user_id, "two-factor setup cancelled");
                    return Ok(());
                }
                Err(TwoFactorError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    /// Replaces the backup-code set wholesale: every previous code becomes
    /// unredeemable, ten fresh plaintext codes are returned once.
    ///
    /// # Errors
    /// `NotFound` unless two-factor is enabled; `ConcurrentModification`
    /// after losing the store race twice.
    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>> {
        let batch = BackupCodeBatch::generate(self.config.recovery_pepper())?;

        for _ in 0..SAVE_ATTEMPTS {
            let config = self.load_enabled(user_id).await?;

            let mut updated = config.clone();
            updated.backup_codes = batch.records.clone();
            updated.version = config.version + 1;

            match self.store.save(&updated, config.version).await {
                Ok(()) => {
                    self.emit(AuditEvent::BackupCodesRegenerated, user_id);
                    info!(user_id = %user_id, "backup codes regenerated");
                    return Ok(batch.codes);
                }
                Err(TwoFactorError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(TwoFactorError::ConcurrentModification)
    }

    async fn load_config(&self, user_id: Uuid) -> Result<TwoFactorConfig> {
        self.store
            .load(user_id)
            .await?
            .ok_or(TwoFactorError::NotFound)
    }

    async fn load_enabled(&self, user_id: Uuid) -> Result<TwoFactorConfig> {
        let config = self.load_config(user_id).await?;
        if config.status == TwoFactorStatus::Enabled {
            Ok(config)
        } else {
            Err(TwoFactorError::NotFound)
        }
    }

    fn open_seed(&self, config: &TwoFactorConfig) -> Result<Vec<u8>> {
        let sealed = config.secret.as_ref().ok_or(TwoFactorError::NotFound)?;
        crypto::decrypt_seed(
            self.config.seed_key(),
            &sealed.ciphertext,
            config.user_id,
            sealed.secret_id,
        )
    }

    fn emit(&self, event: AuditEvent, user_id: Uuid) {
        self.audit.emit(event, user_id, Utc::now());
    }
}

fn cleared_config(user_id: Uuid, version: i64) -> TwoFactorConfig {
    TwoFactorConfig {
        user_id,
        status: TwoFactorStatus::Disabled,
        secret: None,
        backup_codes: Vec::new(),
        enabled_at: None,
        version,
    }
}
