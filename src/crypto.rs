//! TOTP seed encryption at rest.
//!
//! Seeds are sealed with ChaCha20-Poly1305 under the engine's seed key. The
//! AAD binds the ciphertext to the owning user and the setup attempt, so a
//! ciphertext copied between rows fails authentication.

use anyhow::anyhow;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

use crate::config::SEED_KEY_LEN;
use crate::error::{Result, TwoFactorError};

const NONCE_LEN: usize = 12;

/// Encrypts a seed under `key`. Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if the nonce cannot be drawn or encryption fails.
pub fn encrypt_seed(
    key: &[u8; SEED_KEY_LEN],
    seed: &[u8],
    user_id: Uuid,
    secret_id: Uuid,
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(TwoFactorError::EntropySource)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id, secret_id);
    let payload = Payload {
        msg: seed,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow!("seed encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts `nonce (12 bytes) || ciphertext` produced by [`encrypt_seed`].
///
/// # Errors
/// Returns an error if the data is truncated or fails authentication.
pub fn decrypt_seed(
    key: &[u8; SEED_KEY_LEN],
    data: &[u8],
    user_id: Uuid,
    secret_id: Uuid,
) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(anyhow!("invalid seed ciphertext length").into());
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(user_id, secret_id);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow!("seed decryption failure: {e}"))?;

    Ok(plaintext)
}

fn construct_aad(user_id: Uuid, secret_id: Uuid) -> Vec<u8> {
    // AAD = "twofactor-seed:v1|user_id|secret_id"
    format!("twofactor-seed:v1|{user_id}|{secret_id}").into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{decrypt_seed, encrypt_seed};
    use uuid::Uuid;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = [42u8; 32];
        let seed = b"twenty-byte-seed-000";
        let user_id = Uuid::new_v4();
        let secret_id = Uuid::new_v4();

        let sealed = encrypt_seed(&key, seed, user_id, secret_id).unwrap();
        assert_ne!(sealed.as_slice(), seed.as_slice());
        assert!(sealed.len() > seed.len());

        let opened = decrypt_seed(&key, &sealed, user_id, secret_id).unwrap();
        assert_eq!(opened, seed);
    }

    #[test]
    fn decrypt_fails_for_wrong_secret_id() {
        let key = [42u8; 32];
        let user_id = Uuid::new_v4();
        let secret_id = Uuid::new_v4();

        let sealed = encrypt_seed(&key, b"seed", user_id, secret_id).unwrap();
        assert!(decrypt_seed(&key, &sealed, user_id, Uuid::new_v4()).is_err());
    }

    #[test]
    fn decrypt_fails_for_wrong_user() {
        let key = [42u8; 32];
        let secret_id = Uuid::new_v4();

        let sealed = encrypt_seed(&key, b"seed", Uuid::new_v4(), secret_id).unwrap();
        assert!(decrypt_seed(&key, &sealed, Uuid::new_v4(), secret_id).is_err());
    }

    #[test]
    fn decrypt_fails_for_tampered_ciphertext() {
        let key = [42u8; 32];
        let user_id = Uuid::new_v4();
        let secret_id = Uuid::new_v4();

        let mut sealed = encrypt_seed(&key, b"seed", user_id, secret_id).unwrap();
        let len = sealed.len();
        if let Some(byte) = sealed.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        assert!(decrypt_seed(&key, &sealed, user_id, secret_id).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_input() {
        let key = [42u8; 32];
        assert!(decrypt_seed(&key, &[0u8; 4], Uuid::new_v4(), Uuid::new_v4()).is_err());
    }
}
