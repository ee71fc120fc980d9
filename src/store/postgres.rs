//! `PostgreSQL` state store.
//!
//! One row per user in `two_factor_configs`; recovery-code records ride in a
//! JSONB column so the whole configuration persists in a single
//! version-guarded statement.

use async_trait::async_trait;
use anyhow::Context;
use sqlx::{PgPool, Row, types::Json};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Result, TwoFactorError};
use crate::models::{SealedSecret, StoredBackupCode, TwoFactorConfig, TwoFactorStatus};
use crate::store::TwoFactorStateStore;

/// Schema applied by the embedding service's migrations.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS two_factor_configs (
    user_id UUID PRIMARY KEY,
    status TEXT NOT NULL,
    secret_id UUID,
    seed_ciphertext BYTEA,
    secret_created_at TIMESTAMPTZ,
    backup_codes JSONB NOT NULL DEFAULT '[]'::jsonb,
    enabled_at TIMESTAMPTZ,
    version BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

#[derive(Clone, Debug)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TwoFactorStateStore for PgStateStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorConfig>> {
        let query = r"
            SELECT status, secret_id, seed_ciphertext, secret_created_at,
                   backup_codes, enabled_at, version
            FROM two_factor_configs
            WHERE user_id = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load two-factor configuration")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_text: String = row.try_get("status").context("missing status column")?;
        let status = TwoFactorStatus::from_str(&status_text)
            .ok_or_else(|| anyhow::anyhow!("invalid two_factor_configs.status: {status_text}"))?;

        let secret_id: Option<Uuid> = row.try_get("secret_id").context("bad secret_id")?;
        let ciphertext: Option<Vec<u8>> = row
            .try_get("seed_ciphertext")
            .context("bad seed_ciphertext")?;
        let secret_created_at = row
            .try_get("secret_created_at")
            .context("bad secret_created_at")?;
        let secret = match (secret_id, ciphertext, secret_created_at) {
            (Some(secret_id), Some(ciphertext), Some(created_at)) => Some(SealedSecret {
                secret_id,
                ciphertext,
                created_at,
            }),
            _ => None,
        };

        let Json(backup_codes): Json<Vec<StoredBackupCode>> =
            row.try_get("backup_codes").context("bad backup_codes")?;

        Ok(Some(TwoFactorConfig {
            user_id,
            status,
            secret,
            backup_codes,
            enabled_at: row.try_get("enabled_at").context("bad enabled_at")?,
            version: row.try_get("version").context("bad version")?,
        }))
    }

    async fn save(&self, config: &TwoFactorConfig, expected_version: i64) -> Result<()> {
        let (secret_id, ciphertext, secret_created_at) = match &config.secret {
            Some(secret) => (
                Some(secret.secret_id),
                Some(secret.ciphertext.as_slice()),
                Some(secret.created_at),
            ),
            None => (None, None, None),
        };
        let backup_codes = Json(&config.backup_codes);

        let affected = if expected_version == 0 {
            let query = r"
                INSERT INTO two_factor_configs
                    (user_id, status, secret_id, seed_ciphertext, secret_created_at,
                     backup_codes, enabled_at, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (user_id) DO NOTHING
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT"
            );
            sqlx::query(query)
                .bind(config.user_id)
                .bind(config.status.as_str())
                .bind(secret_id)
                .bind(ciphertext)
                .bind(secret_created_at)
                .bind(backup_codes)
                .bind(config.enabled_at)
                .bind(config.version)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to insert two-factor configuration")?
                .rows_affected()
        } else {
            let query = r"
                UPDATE two_factor_configs
                SET status = $2,
                    secret_id = $3,
                    seed_ciphertext = $4,
                    secret_created_at = $5,
                    backup_codes = $6,
                    enabled_at = $7,
                    version = $8,
                    updated_at = NOW()
                WHERE user_id = $1
                  AND version = $9
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE"
            );
            sqlx::query(query)
                .bind(config.user_id)
                .bind(config.status.as_str())
                .bind(secret_id)
                .bind(ciphertext)
                .bind(secret_created_at)
                .bind(backup_codes)
                .bind(config.enabled_at)
                .bind(config.version)
                .bind(expected_version)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to update two-factor configuration")?
                .rows_affected()
        };

        if affected == 1 {
            Ok(())
        } else {
            Err(TwoFactorError::Conflict)
        }
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM two_factor_configs WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete two-factor configuration")?;
        Ok(())
    }
}
