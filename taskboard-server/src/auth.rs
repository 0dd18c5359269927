//! Password hashing and bearer tokens.
//!
//! Passwords are stored as bcrypt hashes; hashing and verification run on the
//! blocking pool. Tokens are HS256 JWTs carrying the user id and email.

use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// bcrypt cost used for new passwords.
pub const DEFAULT_HASH_COST: u32 = 10;

/// Cheapest cost bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;

/// Default token lifetime (7 days).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors raised while hashing passwords or issuing and verifying tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Signing the token failed.
    #[error("failed to sign token: {0}")]
    Sign(jsonwebtoken::errors::Error),
    /// The token is malformed, expired, or signed with another key.
    #[error("invalid token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),
    /// Hashing a password failed.
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated user id.
    pub user_id: String,
    /// Email at the time the token was issued.
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    iat: u64,
    exp: u64,
}

/// Hashes a password with bcrypt at `cost`.
///
/// # Errors
///
/// Returns [`AuthError::Hash`] for an out-of-range cost or if the blocking
/// task fails.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Checks a password against a stored bcrypt hash.
///
/// Returns `false` for malformed stored hashes.
pub async fn verify_password(password: &str, stored: &str) -> bool {
    let password = password.to_owned();
    let stored = stored.to_owned();
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "stored password hash is unreadable");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "password verification task failed");
            false
        }
    }
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    /// Creates an issuer signing with `secret`.
    #[must_use]
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Signs a token for the given user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Sign`] if encoding fails.
    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, AuthError> {
        let iat = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat,
            exp: iat.saturating_add(self.ttl.as_secs()),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::Sign)
    }

    /// Verifies a token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for any verification failure.
    pub fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(AuthError::InvalidToken)?;
        Ok(AuthContext {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn hash_verifies_only_the_right_password() {
        let stored = hash_password("secret1", MIN_HASH_COST).await.unwrap();
        assert!(verify_password("secret1", &stored).await);
        assert!(!verify_password("secret2", &stored).await);
        assert!(!verify_password("", &stored).await);
    }

    #[tokio::test]
    async fn hashes_are_salted_bcrypt_strings() {
        let a = hash_password("secret1", MIN_HASH_COST).await.unwrap();
        let b = hash_password("secret1", MIN_HASH_COST).await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$2"), "{a}");
        assert!(!a.contains("secret1"));
    }

    #[tokio::test]
    async fn out_of_range_cost_is_an_error() {
        assert!(matches!(
            hash_password("pw", 1).await,
            Err(AuthError::Hash(_))
        ));
    }

    #[tokio::test]
    async fn malformed_hashes_never_verify() {
        for stored in ["", "abc", "1$zz$00", "$2b$04$short"] {
            assert!(!verify_password("pw", stored).await, "{stored}");
        }
    }

    #[test]
    fn token_round_trip() {
        let issuer = TokenIssuer::new(b"test-secret", DEFAULT_TOKEN_TTL);
        let token = issuer.issue("u1", "ada@example.com").unwrap();
        let ctx = issuer.verify(&token).unwrap();
        assert_eq!(ctx, AuthContext {
            user_id: "u1".to_string(),
            email: "ada@example.com".to_string(),
        });
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let a = TokenIssuer::new(b"secret-a", DEFAULT_TOKEN_TTL);
        let b = TokenIssuer::new(b"secret-b", DEFAULT_TOKEN_TTL);
        let token = a.issue("u1", "ada@example.com").unwrap();
        assert!(matches!(b.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let issuer = TokenIssuer::new(b"s", DEFAULT_TOKEN_TTL);
        assert!(issuer.verify("not.a.jwt").is_err());
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
