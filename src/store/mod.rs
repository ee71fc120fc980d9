//! Persistence contract for per-user two-factor configuration.
//!
//! The store is an external collaborator: the engine expresses every
//! multi-field update as one [`TwoFactorStateStore::save`] of the fully
//! updated configuration, guarded by optimistic versioning, and assumes no
//! multi-entity transactions beyond that.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::TwoFactorConfig;

/// Versioned load/save contract, one configuration per user.
///
/// `save` persists `config` as given if and only if the currently stored
/// version equals `expected_version`; `expected_version == 0` means "no row
/// exists yet". A stale expectation fails with
/// [`TwoFactorError::Conflict`](crate::TwoFactorError::Conflict), which the
/// coordinator turns into its retry-once policy.
#[async_trait]
pub trait TwoFactorStateStore: Send + Sync {
    /// Loads the configuration for `user_id`, `None` when absent.
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorConfig>>;

    /// Persists `config` under the optimistic version guard described above.
    async fn save(&self, config: &TwoFactorConfig, expected_version: i64) -> Result<()>;

    /// Removes the configuration entirely. Reserved for account-deletion
    /// cascades driven by the caller; the engine itself only disables.
    async fn delete(&self, user_id: Uuid) -> Result<()>;
}
