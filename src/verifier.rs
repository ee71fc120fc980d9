//! RFC 6238 code verification with bounded clock-skew tolerance.
//!
//! Stateless and free of I/O: the verifier accepts a raw seed and a submitted
//! code and answers in sub-millisecond time. Throttling lives with the
//! caller (see [`crate::rate_limit`]).

use anyhow::anyhow;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::{Choice, ConstantTimeEq};
use totp_rs::{Algorithm, TOTP};

use crate::error::{Result, TwoFactorError};
use crate::provisioner::{DIGITS, PERIOD};

/// One time step of tolerated drift on either side (±30 s).
const SKEW_STEPS: u64 = 1;

/// Verifies `code` against `seed` at the current wall clock.
///
/// # Errors
/// [`TwoFactorError::InvalidFormat`] for non-6-digit input; `Internal` if the
/// system clock is unusable.
pub fn verify(seed: &[u8], code: &str) -> Result<bool> {
    verify_at(seed, code, unix_now()?)
}

/// Verifies `code` against `seed` at an explicit Unix timestamp.
///
/// Accepts the time steps `{t-1, t, t+1}` and compares every candidate in
/// constant time without early exit, so timing does not reveal which step
/// (if any) matched. Spaces and dashes in the input are ignored.
///
/// # Errors
/// [`TwoFactorError::InvalidFormat`] when the cleaned input is not exactly
/// 6 ASCII digits.
pub fn verify_at(seed: &[u8], code: &str, unix_time: u64) -> Result<bool> {
    let code = code.replace([' ', '-'], "");
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TwoFactorError::InvalidFormat);
    }

    let totp = build_totp(seed)?;

    let mut matched = Choice::from(0u8);
    let earliest = unix_time.saturating_sub(SKEW_STEPS * PERIOD);
    for step in 0..=(2 * SKEW_STEPS) {
        let candidate = totp.generate(earliest + step * PERIOD);
        matched |= candidate.as_bytes().ct_eq(code.as_bytes());
    }

    Ok(matched.into())
}

/// Computes the code for `seed` at `unix_time`. Intended for enrollment
/// previews and tests; production verification goes through [`verify`].
///
/// # Errors
/// Returns an error if the seed is rejected by the TOTP backend.
pub fn generate_at(seed: &[u8], unix_time: u64) -> Result<String> {
    Ok(build_totp(seed)?.generate(unix_time))
}

fn build_totp(seed: &[u8]) -> Result<TOTP> {
    TOTP::new(Algorithm::SHA1, DIGITS, 1, PERIOD, seed.to_vec())
        .map_err(|e| anyhow!("TOTP init error: {e}").into())
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow!("system clock before Unix epoch: {e}"))?
        .as_secs())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{generate_at, verify, verify_at};
    use crate::error::TwoFactorError;

    const SEED: &[u8] = b"twenty-byte-seed-000";
    // Step-aligned timestamp so offsets land in predictable steps.
    const T: u64 = 1_700_000_010;

    #[test]
    fn accepts_codes_inside_the_skew_window() {
        for t in [T - 30, T, T + 30] {
            let code = generate_at(SEED, t).unwrap();
            assert!(verify_at(SEED, &code, T).unwrap(), "code for t={t} rejected");
        }
    }

    #[test]
    fn rejects_codes_outside_the_skew_window() {
        for t in [T - 90, T - 60, T + 60, T + 90] {
            let code = generate_at(SEED, t).unwrap();
            // Codes two steps away can collide only if HMAC outputs collide,
            // which would make the test seed unusable; regenerate if so.
            assert!(!verify_at(SEED, &code, T).unwrap(), "code for t={t} accepted");
        }
    }

    #[test]
    fn rejects_wrong_code() {
        let code = generate_at(SEED, T).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(!verify_at(SEED, wrong, T).unwrap());
    }

    #[test]
    fn tolerates_spaces_and_dashes() {
        let code = generate_at(SEED, T).unwrap();
        let spaced = format!("{} {}", &code[..3], &code[3..]);
        let dashed = format!("{}-{}", &code[..3], &code[3..]);
        assert!(verify_at(SEED, &spaced, T).unwrap());
        assert!(verify_at(SEED, &dashed, T).unwrap());
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "12345", "1234567", "12345a", "abcdef"] {
            assert!(matches!(
                verify_at(SEED, input, T),
                Err(TwoFactorError::InvalidFormat)
            ));
        }
    }

    #[test]
    fn wall_clock_verify_accepts_current_code() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let code = generate_at(SEED, now).unwrap();
        assert!(verify(SEED, &code).unwrap());
    }
}
