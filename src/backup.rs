//! Recovery code generation and verification.
//!
//! Recovery codes allow one-time two-factor bypass when the authenticator
//! device is unavailable. Codes are Argon2id-hashed with a server-side
//! pepper; plaintext leaves the engine exactly once, at generation time.

use anyhow::{Context, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use chrono::Utc;
use rand::{RngCore, rngs::OsRng};
use std::collections::HashSet;

use crate::error::{Result, TwoFactorError};
use crate::models::StoredBackupCode;

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LEN: usize = 8;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// Excludes characters that read ambiguously (0/O, 1/I/L).
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly issued recovery-code set: plaintext for the caller, hashed
/// records for the store.
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub records: Vec<StoredBackupCode>,
}

impl BackupCodeBatch {
    /// Generates [`BACKUP_CODE_COUNT`] unique codes, hashing each with the
    /// provided pepper. Intra-batch duplicates are redrawn.
    ///
    /// # Errors
    /// Returns an error if the entropy source or the hasher fails.
    pub fn generate(pepper: &[u8]) -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng, pepper)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, pepper: &[u8]) -> Result<Self> {
        let issued_at = Utc::now();
        let mut seen = HashSet::with_capacity(BACKUP_CODE_COUNT);
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut records = Vec::with_capacity(BACKUP_CODE_COUNT);

        while codes.len() < BACKUP_CODE_COUNT {
            let code = generate_code(rng)?;
            if !seen.insert(code.clone()) {
                continue;
            }
            let code_hash = hash_backup_code(&code, pepper)?;
            codes.push(code);
            records.push(StoredBackupCode {
                code_hash,
                used: false,
                used_at: None,
                issued_at,
            });
        }

        Ok(Self { codes, records })
    }
}

/// Normalizes user input for verification: strips separators, uppercases,
/// and enforces length and alphabet.
///
/// # Errors
/// [`TwoFactorError::InvalidFormat`] when the cleaned input cannot be a code
/// this engine issued.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(TwoFactorError::InvalidFormat);
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(TwoFactorError::InvalidFormat);
    }

    Ok(normalized)
}

/// Formats a normalized code for display (`XXXX-XXXX`).
///
/// # Errors
/// Returns an error for inputs of the wrong length.
pub fn format_backup_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length").into());
    }
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 1);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid backup code chunk")?);
    }
    Ok(out)
}

/// Verifies a submitted code against one stored hash.
///
/// # Errors
/// Propagates hasher initialization failures; malformed input is reported as
/// [`TwoFactorError::InvalidFormat`].
pub fn verify_backup_code(code: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let normalized = normalize_backup_code(code)?;
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return Err(anyhow!("invalid backup code hash").into());
    };
    Ok(peppered_argon2(pepper)?
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.try_fill_bytes(&mut raw)
        .map_err(TwoFactorError::EntropySource)?;
    let mut code = String::with_capacity(BACKUP_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % BACKUP_CODE_ALPHABET.len();
        if let Some(&char_byte) = BACKUP_CODE_ALPHABET.get(idx) {
            code.push(char_byte as char);
        }
    }
    Ok(code)
}

fn hash_backup_code(code: &str, pepper: &[u8]) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = peppered_argon2(pepper)?
        .hash_password(code.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash backup code"))?
        .to_string();
    Ok(hash)
}

fn peppered_argon2(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow!("failed to initialize Argon2id").into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::{
        BACKUP_CODE_COUNT, BACKUP_CODE_LEN, BackupCodeBatch, format_backup_code,
        normalize_backup_code, verify_backup_code,
    };
    use crate::error::TwoFactorError;
    use std::collections::HashSet;

    #[test]
    fn batch_has_ten_unique_well_formed_codes() {
        let batch = BackupCodeBatch::generate(b"pepper").unwrap();
        assert_eq!(batch.codes.len(), BACKUP_CODE_COUNT);
        assert_eq!(batch.records.len(), BACKUP_CODE_COUNT);

        let unique: HashSet<_> = batch.codes.iter().collect();
        assert_eq!(unique.len(), BACKUP_CODE_COUNT);
        assert!(batch.codes.iter().all(|code| code.len() == BACKUP_CODE_LEN));
        assert!(batch.records.iter().all(|record| !record.used));
    }

    #[test]
    fn normalize_strips_separators_and_uppercases() {
        assert_eq!(normalize_backup_code("abcd-efgh").unwrap(), "ABCDEFGH");
        assert_eq!(normalize_backup_code("AB CD EF GH").unwrap(), "ABCDEFGH");
    }

    #[test]
    fn normalize_rejects_bad_input() {
        for input in ["", "ABCDEFG", "ABCDEFGHJ", "ABCD-EF01", "ABCDEFG!"] {
            assert!(matches!(
                normalize_backup_code(input),
                Err(TwoFactorError::InvalidFormat)
            ));
        }
    }

    #[test]
    fn format_groups_in_fours() {
        assert_eq!(format_backup_code("ABCDEFGH").unwrap(), "ABCD-EFGH");
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let pepper = b"pepper";
        let batch = BackupCodeBatch::generate(pepper).unwrap();
        let code = &batch.codes[0];
        let hash = &batch.records[0].code_hash;
        assert!(verify_backup_code(code, hash, pepper).unwrap());
        assert!(!verify_backup_code("ABCD2345", hash, pepper).unwrap());
    }

    #[test]
    fn pepper_is_load_bearing() {
        let batch = BackupCodeBatch::generate(b"pepper").unwrap();
        let code = &batch.codes[0];
        let hash = &batch.records[0].code_hash;
        assert!(!verify_backup_code(code, hash, b"other-pepper").unwrap());
    }

    #[test]
    fn verify_accepts_display_formatting() {
        let pepper = b"pepper";
        let batch = BackupCodeBatch::generate(pepper).unwrap();
        let displayed = format_backup_code(&batch.codes[0]).unwrap();
        assert!(verify_backup_code(&displayed, &batch.records[0].code_hash, pepper).unwrap());
    }
}
