//! Error taxonomy for the two-factor engine.
//!
//! Verification failures are deliberately coarse: callers can tell a wrong
//! code from a malformed one, but never whether a code was expired, unknown,
//! or already redeemed. Infra failures carry full context internally via
//! [`TwoFactorError::Internal`] and should be surfaced generically.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, TwoFactorError>;

#[derive(Debug, thiserror::Error)]
pub enum TwoFactorError {
    /// The secure random source refused to produce bytes. Fatal; the caller
    /// may retry the whole operation.
    #[error("entropy source unavailable")]
    EntropySource(#[source] rand::Error),

    /// Submitted code is not a 6-digit string (after removing spaces/dashes).
    #[error("code must be exactly 6 digits")]
    InvalidFormat,

    /// Code or recovery code did not verify. Recoverable; the user retries.
    #[error("invalid code")]
    InvalidCode,

    /// Too many failed attempts inside the rolling window.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The caller-supplied re-authentication proof was missing or not marked
    /// valid for this user.
    #[error("re-authentication required")]
    ReauthRequired,

    /// Lost an optimistic-concurrency race twice in a row.
    #[error("concurrent modification")]
    ConcurrentModification,

    /// No usable two-factor configuration for this user.
    #[error("two-factor configuration not found")]
    NotFound,

    /// Store-level stale write: the persisted version moved underneath us.
    #[error("version conflict")]
    Conflict,

    /// Infrastructure failure (database, crypto backend). Logged with full
    /// context, surfaced without detail.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}
