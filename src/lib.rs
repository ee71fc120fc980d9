//! # Dufaktoro (Two-Factor Authentication Engine)
//!
//! `dufaktoro` implements the TOTP enrollment, verification and
//! backup-recovery-code lifecycle behind a user-facing identity service.
//! It owns the security protocol (shared-secret provisioning, RFC 6238
//! time-windowed codes and single-use recovery-code redemption) while the
//! HTTP surface, sessions and re-authentication remain with the caller.
//!
//! ## Enrollment state machine
//!
//! Each user has exactly one [`TwoFactorConfig`] moving through
//! `Disabled → PendingVerification → Enabled` (and back to `Disabled` on a
//! re-authenticated disable or a cancelled setup). All transitions go
//! through the [`EnrollmentCoordinator`]; the state survives reloads and
//! device switches because it lives in the [`store`], not in UI state.
//!
//! ## Security boundaries
//!
//! - TOTP seeds are encrypted at rest (ChaCha20-Poly1305, AAD-bound to the
//!   user and setup attempt) and never logged after initial display.
//! - Recovery codes are Argon2id-hashed with a server-side pepper; their
//!   plaintext is returned exactly once, at issuance.
//! - Code comparison is constant-time; failures are throttled per user and
//!   reported without distinguishing wrong, expired or already-used codes.
//! - Single-use redemption is enforced through optimistic store versioning,
//!   so two concurrent redemptions of one code yield exactly one success.
//!
//! Disabling requires proof of re-authentication; the engine accepts that
//! proof as an opaque, caller-validated [`ReauthToken`] and performs no
//! re-authentication of its own.

pub mod audit;
pub mod backup;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod models;
pub mod provisioner;
pub mod rate_limit;
pub mod store;
pub mod verifier;

pub use audit::{AuditEmitter, AuditEvent, NoopAuditEmitter, TracingAuditEmitter};
pub use config::EngineConfig;
pub use coordinator::{EnrollmentCoordinator, SetupStart};
pub use error::{Result, TwoFactorError};
pub use models::{ReauthToken, TwoFactorConfig, TwoFactorStatus};
pub use store::{MemoryStateStore, PgStateStore, TwoFactorStateStore};
