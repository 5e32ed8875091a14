//! Password validation and hashing.

use std::fmt::Display;

use bcrypt::{hash, verify};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A password that has passed validation but is not yet hashed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ValidatedPassword(String);

impl ValidatedPassword {
    /// Validate a raw password.
    ///
    /// # Errors
    /// Returns [Error::InvalidInput] if `raw_password` is empty.
    pub fn new(raw_password: &str) -> Result<Self, Error> {
        if raw_password.is_empty() {
            return Err(Error::InvalidInput("password cannot be empty".to_owned()));
        }

        Ok(Self(raw_password.to_owned()))
    }

    /// Create a password without validation.
    #[cfg(test)]
    pub fn new_unchecked(raw_password: &str) -> Self {
        Self(raw_password.to_owned())
    }
}

impl TryFrom<String> for ValidatedPassword {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl AsRef<str> for ValidatedPassword {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Never print the password itself.
impl std::fmt::Debug for ValidatedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValidatedPassword(********)")
    }
}

/// A bcrypt password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// The cost used when none is configured.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

    /// The smallest cost bcrypt accepts, used by tests.
    pub const MIN_COST: u32 = 4;

    /// Hash `password` with the given bcrypt `cost`.
    ///
    /// This is CPU heavy, use [hash_password] from async code.
    ///
    /// # Errors
    /// Returns [Error::HashingError] if bcrypt rejects the cost or fails.
    pub fn new(password: &ValidatedPassword, cost: u32) -> Result<Self, Error> {
        hash(password.as_ref(), cost)
            .map(Self)
            .map_err(|error| Error::HashingError(error.to_string()))
    }

    /// Wrap a hash read from the database.
    pub fn new_unchecked(hash: &str) -> Self {
        Self(hash.to_owned())
    }

    /// Check `raw_password` against the hash.
    ///
    /// # Errors
    /// Returns [Error::HashingError] if the stored hash is malformed.
    pub fn verify(&self, raw_password: &str) -> Result<bool, Error> {
        verify(raw_password, &self.0).map_err(|error| Error::HashingError(error.to_string()))
    }
}

impl AsRef<str> for PasswordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash `password` on the blocking thread pool.
///
/// # Errors
/// Returns [Error::HashingError] if hashing fails or the task panics.
pub async fn hash_password(password: ValidatedPassword, cost: u32) -> Result<PasswordHash, Error> {
    tokio::task::spawn_blocking(move || PasswordHash::new(&password, cost))
        .await
        .map_err(|error| {
            tracing::error!("password hashing task failed: {error}");
            Error::HashingError(error.to_string())
        })?
}

/// Verify `raw_password` against `password_hash` on the blocking thread pool.
///
/// # Errors
/// Returns [Error::HashingError] if verification fails or the task panics.
pub async fn verify_password(password_hash: PasswordHash, raw_password: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || password_hash.verify(&raw_password))
        .await
        .map_err(|error| {
            tracing::error!("password verification task failed: {error}");
            Error::HashingError(error.to_string())
        })?
}
