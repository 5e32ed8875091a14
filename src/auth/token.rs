//! Bearer tokens: signing and validating the JWTs handed out at log in.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, database_id::UserID};

/// How long a token stays valid when no duration is configured.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::hours(24);

/// The secret used by tests.
#[cfg(test)]
pub const TEST_TOKEN_SECRET: &str = "spendshare-test-secret";

/// The claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The ID of the user the token was issued to.
    pub sub: UserID,
    /// The session the token belongs to.
    pub sid: Uuid,
    /// Issued at, as a Unix timestamp.
    pub iat: i64,
    /// Expiry, as a Unix timestamp.
    pub exp: i64,
}

/// The keys used to sign and validate tokens.
#[derive(Clone)]
pub struct TokenKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenKeys {
    /// Derive the signing keys from `secret`.
    ///
    /// The secret is hashed with SHA-512 first so that short secrets still
    /// produce a full-length HMAC key.
    pub fn from_secret(secret: &str) -> Self {
        let key = Sha512::digest(secret.as_bytes());

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
        }
    }
}

/// A freshly signed token and when it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Sign a token for `user_id` and `session_id` valid for `duration`.
///
/// # Errors
/// Returns [Error::TokenCreation] if the token cannot be signed.
pub fn encode_token(
    user_id: UserID,
    session_id: Uuid,
    duration: Duration,
    keys: &TokenKeys,
) -> Result<IssuedToken, Error> {
    let now = OffsetDateTime::now_utc();
    let expires_at = now + duration;
    let claims = Claims {
        sub: user_id,
        sid: session_id,
        iat: now.unix_timestamp(),
        exp: expires_at.unix_timestamp(),
    };

    let token = encode(&Header::default(), &claims, &keys.encoding_key).map_err(|error| {
        tracing::error!("could not sign token: {error}");
        Error::TokenCreation(error.to_string())
    })?;

    Ok(IssuedToken { token, expires_at })
}

/// Validate the signature and expiry of `token` and return its claims.
///
/// # Errors
/// Returns [Error::Unauthenticated] for any malformed, forged or expired
/// token.
pub fn decode_token(token: &str, keys: &TokenKeys) -> Result<Claims, Error> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    decode::<Claims>(token, &keys.decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|error| {
            tracing::debug!("rejected bearer token: {error}");
            Error::Unauthenticated
        })
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use uuid::Uuid;

    use crate::{Error, database_id::UserID};

    use super::{TEST_TOKEN_SECRET, TokenKeys, decode_token, encode_token};

    #[test]
    fn decode_returns_encoded_claims() {
        let keys = TokenKeys::from_secret(TEST_TOKEN_SECRET);
        let session_id = Uuid::new_v4();

        let issued = encode_token(UserID::new(7), session_id, Duration::hours(1), &keys).unwrap();
        let claims = decode_token(&issued.token, &keys).unwrap();

        assert_eq!(claims.sub, UserID::new(7));
        assert_eq!(claims.sid, session_id);
        assert_eq!(claims.exp, issued.expires_at.unix_timestamp());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let keys = TokenKeys::from_secret(TEST_TOKEN_SECRET);
        let other_keys = TokenKeys::from_secret("a different secret");

        let issued = encode_token(UserID::new(1), Uuid::new_v4(), Duration::hours(1), &other_keys)
            .unwrap();

        assert_eq!(decode_token(&issued.token, &keys), Err(Error::Unauthenticated));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = TokenKeys::from_secret(TEST_TOKEN_SECRET);

        let issued =
            encode_token(UserID::new(1), Uuid::new_v4(), Duration::minutes(-5), &keys).unwrap();

        assert_eq!(decode_token(&issued.token, &keys), Err(Error::Unauthenticated));
    }

    #[test]
    fn garbage_is_rejected() {
        let keys = TokenKeys::from_secret(TEST_TOKEN_SECRET);

        assert_eq!(decode_token("not.a.token", &keys), Err(Error::Unauthenticated));
    }
}
