//! Engine configuration loaded at startup.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_FAILURE_LIMIT: u32 = 5;
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(15 * 60);

const ENV_ISSUER: &str = "DUFAKTORO_ISSUER";
const ENV_SEED_KEY: &str = "DUFAKTORO_SEED_KEY";
const ENV_RECOVERY_PEPPER: &str = "DUFAKTORO_RECOVERY_PEPPER";

/// Length of the key used to encrypt TOTP seeds at rest.
pub const SEED_KEY_LEN: usize = 32;

/// Engine configuration: provisioning identity, key material and throttling
/// knobs.
#[derive(Clone)]
pub struct EngineConfig {
    issuer: String,
    seed_key: Arc<[u8; SEED_KEY_LEN]>,
    recovery_pepper: Arc<[u8]>,
    failure_limit: u32,
    failure_window: Duration,
}

impl EngineConfig {
    /// Build a configuration from explicit key material.
    ///
    /// # Errors
    /// Returns an error if `seed_key` is not exactly [`SEED_KEY_LEN`] bytes.
    pub fn new(
        issuer: impl Into<String>,
        seed_key: &[u8],
        recovery_pepper: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        let seed_key: [u8; SEED_KEY_LEN] = seed_key
            .try_into()
            .map_err(|_| anyhow!("seed key must be exactly {SEED_KEY_LEN} bytes"))?;
        Ok(Self {
            issuer: issuer.into(),
            seed_key: Arc::new(seed_key),
            recovery_pepper: recovery_pepper.into(),
            failure_limit: DEFAULT_FAILURE_LIMIT,
            failure_window: DEFAULT_FAILURE_WINDOW,
        })
    }

    #[must_use]
    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.failure_limit = limit;
        self
    }

    #[must_use]
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Issuer shown in authenticator apps and embedded in provisioning URIs.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn seed_key(&self) -> &[u8; SEED_KEY_LEN] {
        &self.seed_key
    }

    pub(crate) fn recovery_pepper(&self) -> &[u8] {
        &self.recovery_pepper
    }

    #[must_use]
    pub fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    #[must_use]
    pub fn failure_window(&self) -> Duration {
        self.failure_window
    }

    /// Load configuration from environment variables.
    ///
    /// `DUFAKTORO_SEED_KEY` and `DUFAKTORO_RECOVERY_PEPPER` are standard
    /// base64; the seed key must decode to exactly [`SEED_KEY_LEN`] bytes.
    ///
    /// # Errors
    /// Returns an error when a variable is missing or fails to decode.
    pub fn from_env() -> Result<Self> {
        let issuer =
            std::env::var(ENV_ISSUER).with_context(|| format!("{ENV_ISSUER} is not set"))?;
        let seed_key = decode_base64_env(ENV_SEED_KEY)?;
        let pepper = decode_base64_env(ENV_RECOVERY_PEPPER)?;
        Self::new(issuer, &seed_key, pepper)
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("issuer", &self.issuer)
            .field("seed_key", &"[REDACTED]")
            .field("recovery_pepper", &"[REDACTED]")
            .field("failure_limit", &self.failure_limit)
            .field("failure_window", &self.failure_window)
            .finish()
    }
}

fn decode_base64_env(key: &str) -> Result<Vec<u8>> {
    let value = std::env::var(key).with_context(|| format!("{key} is not set"))?;
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .with_context(|| format!("{key} is not valid base64"))
}
