//! In-memory state store for tests and single-process embedding.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, TwoFactorError};
use crate::models::TwoFactorConfig;
use crate::store::TwoFactorStateStore;

/// `HashMap`-backed store with the same versioning semantics as the
/// Postgres implementation.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    configs: Mutex<HashMap<Uuid, TwoFactorConfig>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwoFactorStateStore for MemoryStateStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorConfig>> {
        Ok(self.configs.lock().await.get(&user_id).cloned())
    }

    async fn save(&self, config: &TwoFactorConfig, expected_version: i64) -> Result<()> {
        let mut configs = self.configs.lock().await;
        let current = configs.get(&config.user_id).map(|existing| existing.version);
        match (current, expected_version) {
            (None, 0) => {
                configs.insert(config.user_id, config.clone());
                Ok(())
            }
            (Some(version), expected) if version == expected && expected != 0 => {
                configs.insert(config.user_id, config.clone());
                Ok(())
            }
            _ => Err(TwoFactorError::Conflict),
        }
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        self.configs.lock().await.remove(&user_id);
        Ok(())
    }
}
