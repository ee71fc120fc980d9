//! Shared-secret provisioning: seed generation and `otpauth://` URIs.
//!
//! Security boundaries: the raw seed lives in a [`SecretBox`] and is exposed
//! exactly twice per setup, to seal it for storage and to render the
//! provisioning material returned to the caller. It is never logged.

use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use totp_rs::Secret;
use uuid::Uuid;

use crate::error::{Result, TwoFactorError};

/// Raw seed length in bytes (RFC 4226 recommends 160 bits for SHA-1).
pub const SEED_LEN: usize = 20;

/// TOTP parameters fixed by this engine for authenticator compatibility.
pub const ALGORITHM: &str = "SHA1";
pub const DIGITS: usize = 6;
pub const PERIOD: u64 = 30;

/// A freshly generated shared secret, before it is sealed for storage.
#[derive(Debug)]
pub struct TwoFactorSecret {
    pub secret_id: Uuid,
    pub created_at: DateTime<Utc>,
    seed: SecretBox<[u8; SEED_LEN]>,
}

impl TwoFactorSecret {
    /// Raw seed bytes. Callers must not persist or log these.
    #[must_use]
    pub fn seed(&self) -> &[u8; SEED_LEN] {
        self.seed.expose_secret()
    }

    /// Base32 rendering for manual entry into authenticator apps.
    #[must_use]
    pub fn base32(&self) -> String {
        Secret::Raw(self.seed().to_vec()).to_encoded().to_string()
    }
}

/// Draws a fresh 20-byte seed from the OS entropy source.
///
/// # Errors
/// Returns [`TwoFactorError::EntropySource`] when the source is unavailable.
pub fn generate_secret() -> Result<TwoFactorSecret> {
    let mut seed = [0u8; SEED_LEN];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(TwoFactorError::EntropySource)?;

    Ok(TwoFactorSecret {
        secret_id: Uuid::new_v4(),
        created_at: Utc::now(),
        seed: SecretBox::new(Box::new(seed)),
    })
}

/// Builds the `otpauth://totp/...` URI consumed by authenticator apps.
///
/// Issuer and account label are percent-encoded; the secret is the base32
/// seed. Pure string construction, no side effects.
#[must_use]
pub fn provisioning_uri(secret_base32: &str, account_label: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer_enc}:{label_enc}?secret={secret_base32}&issuer={issuer_enc}&algorithm={ALGORITHM}&digits={DIGITS}&period={PERIOD}",
        issuer_enc = urlencoding::encode(issuer),
        label_enc = urlencoding::encode(account_label),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{SEED_LEN, generate_secret, provisioning_uri};

    #[test]
    fn seed_is_twenty_bytes_and_not_constant() {
        let secret = generate_secret().unwrap();
        assert_eq!(secret.seed().len(), SEED_LEN);
        assert!(secret.seed().iter().any(|&b| b != 0));

        // Two draws must differ; a collision here means the RNG is broken.
        let other = generate_secret().unwrap();
        assert_ne!(secret.seed(), other.seed());
        assert_ne!(secret.secret_id, other.secret_id);
    }

    #[test]
    fn base32_round_trips_through_totp_rs() {
        let secret = generate_secret().unwrap();
        let decoded = totp_rs::Secret::Encoded(secret.base32()).to_bytes().unwrap();
        assert_eq!(decoded, secret.seed().to_vec());
    }

    #[test]
    fn uri_matches_otpauth_layout() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "user@example.com", "Example App");
        assert_eq!(
            uri,
            "otpauth://totp/Example%20App:user%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Example%20App&algorithm=SHA1&digits=6&period=30"
        );
    }

    #[test]
    fn debug_never_prints_the_seed() {
        let secret = generate_secret().unwrap();
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains(&secret.base32()));
    }
}
