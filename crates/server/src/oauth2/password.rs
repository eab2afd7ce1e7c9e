//! Password hashing and verification utilities.
//!
//! Every account carries its own random salt which is appended to the
//! password before it goes through Argon2id.

use crate::error::PasswordError;
use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use rand::{Rng, distr::Alphanumeric};

/// Length of the per-account salt.
pub const SALT_LEN: usize = 32;

/// Hash a password with a freshly generated per-account salt.
///
/// Returns `(hash, salt)`; both must be stored together.
pub fn hash_password(password: &str) -> Result<(String, String), PasswordError> {
    let salt = random_string(SALT_LEN);
    let hash = hash_with_salt(password, &salt)?;
    Ok((hash, salt))
}

fn hash_with_salt(password: &str, salt: &str) -> Result<String, PasswordError> {
    let phc_salt = SaltString::generate(&mut OsRng);
    let salted = format!("{password}{salt}");
    Argon2::default()
        .hash_password(salted.as_bytes(), &phc_salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a candidate password against a stored hash and salt.
///
/// A wrong password is `Ok(false)`. A hash that cannot be parsed or computed is an error,
/// so callers can tell broken records apart from bad credentials.
pub fn verify_password(
    stored_hash: &str,
    salt: &str,
    candidate: &str,
) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;
    let salted = format!("{candidate}{salt}");
    match Argon2::default().verify_password(salted.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Hash(e.to_string())),
    }
}

/// Random alphanumeric string of `len` characters from the thread-local CSPRNG.
pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a secure random token.
///
/// Returns a URL-safe base64-encoded string of 32 random bytes.
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::rng().random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
