//! Password hashing and verification.
//!
//! Digests are PBKDF2-HMAC-SHA256 with a random per-user salt. Both the
//! digest and the salt are stored hex-encoded next to each other in the
//! user store. Verification recomputes the digest with the stored salt
//! and compares in constant time, so a mismatch reveals nothing about
//! how close the guess was.
//!
//! Plaintext passwords never leave the stack frames of these functions.

use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Digest length in bytes (SHA-256 output).
pub const DIGEST_LEN: usize = 32;

/// The lowest iteration count the daemon will accept from configuration.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 work factor.
pub const DEFAULT_ITERATIONS: u32 = 200_000;

/// Errors raised when a stored credential cannot be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum PasswordError {
    /// The stored digest or salt is not valid hex.
    #[error("stored credential is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),

    /// The decoded digest has the wrong length.
    #[error("stored digest has wrong length: expected {expected} bytes, got {got}")]
    DigestLength { expected: usize, got: usize },
}

/// Derive a digest for a new password.
///
/// Returns `(digest_hex, salt_hex)` with a freshly generated salt.
pub fn hash_password(password: &str, iterations: u32) -> (String, String) {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = pbkdf2_hmac_array::<Sha256, DIGEST_LEN>(password.as_bytes(), &salt, iterations);
    (hex::encode(digest), hex::encode(salt))
}

/// Check a candidate password against a stored digest and salt.
///
/// The comparison is constant-time. An `Err` means the stored credential
/// itself is corrupt, not that the password was wrong.
pub fn verify_password(
    digest_hex: &str,
    salt_hex: &str,
    candidate: &str,
    iterations: u32,
) -> Result<bool, PasswordError> {
    let salt = hex::decode(salt_hex)?;
    let stored = hex::decode(digest_hex)?;
    if stored.len() != DIGEST_LEN {
        return Err(PasswordError::DigestLength {
            expected: DIGEST_LEN,
            got: stored.len(),
        });
    }

    let digest = pbkdf2_hmac_array::<Sha256, DIGEST_LEN>(candidate.as_bytes(), &salt, iterations);
    Ok(digest.as_slice().ct_eq(&stored).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep test iterations low; the work factor is exercised by config
    // validation, not here.
    const TEST_ITERATIONS: u32 = 1_000;

    #[test]
    fn test_hash_then_verify() {
        let (digest, salt) = hash_password("hunter2", TEST_ITERATIONS);
        assert!(verify_password(&digest, &salt, "hunter2", TEST_ITERATIONS).unwrap());
    }

    #[test]
    fn test_wrong_password_fails() {
        let (digest, salt) = hash_password("hunter2", TEST_ITERATIONS);
        assert!(!verify_password(&digest, &salt, "hunter3", TEST_ITERATIONS).unwrap());
        assert!(!verify_password(&digest, &salt, "", TEST_ITERATIONS).unwrap());
    }

    #[test]
    fn test_wrong_iteration_count_fails() {
        let (digest, salt) = hash_password("hunter2", TEST_ITERATIONS);
        assert!(!verify_password(&digest, &salt, "hunter2", TEST_ITERATIONS + 1).unwrap());
    }

    #[test]
    fn test_salts_are_unique() {
        let (digest_a, salt_a) = hash_password("same", TEST_ITERATIONS);
        let (digest_b, salt_b) = hash_password("same", TEST_ITERATIONS);
        assert_ne!(salt_a, salt_b);
        assert_ne!(digest_a, digest_b);
    }

    #[test]
    fn test_encoded_lengths() {
        let (digest, salt) = hash_password("x", TEST_ITERATIONS);
        assert_eq!(digest.len(), DIGEST_LEN * 2);
        assert_eq!(salt.len(), SALT_LEN * 2);
    }

    #[test]
    fn test_corrupt_hex_is_an_error() {
        let (_, salt) = hash_password("x", TEST_ITERATIONS);
        let err = verify_password("not-hex", &salt, "x", TEST_ITERATIONS).unwrap_err();
        assert!(matches!(err, PasswordError::Encoding(_)));
    }

    #[test]
    fn test_truncated_digest_is_an_error() {
        let (digest, salt) = hash_password("x", TEST_ITERATIONS);
        let truncated = &digest[..16];
        let err = verify_password(truncated, &salt, "x", TEST_ITERATIONS).unwrap_err();
        assert_eq!(
            err,
            PasswordError::DigestLength {
                expected: DIGEST_LEN,
                got: 8
            }
        );
    }
}
