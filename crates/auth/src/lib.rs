//! Auth Gate (C8, §4.8): bearer token issuance and verification.
//!
//! The relay only ever verifies tokens here — it doesn't run a login flow.
//! Tokens are expected to have been issued by whatever front door authority
//! authenticates end users; this crate just signs/validates with a shared
//! HMAC secret so the Scope Router can check a token's subject against the
//! resolved `userID` (§4.8 step 4).

use chrono::{Duration, Utc};
use homecast_config::RelayConfig;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id the token was issued for.
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct TokenAuthority {
    secret: String,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            secret: config.token_secret.expose_secret().clone(),
            ttl: Duration::hours(config.token_ttl_hours),
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

/// Extract a bearer token from an `Authorization` header value.
pub fn extract_bearer(header_value: Option<&str>) -> Result<&str> {
    header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(Error::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority {
            secret: "test-secret".into(),
            ttl: Duration::hours(1),
        }
    }

    #[test]
    fn issued_token_verifies_with_matching_subject() {
        let auth = authority();
        let user_id = Uuid::new_v4();
        let token = auth.issue(user_id).unwrap();
        let claims = auth.verify(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let auth = authority();
        let token = auth.issue(Uuid::new_v4()).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(auth.verify(&tampered).is_err());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let auth = authority();
        let token = auth.issue(Uuid::new_v4()).unwrap();
        let other = TokenAuthority {
            secret: "different-secret".into(),
            ttl: Duration::hours(1),
        };
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn extract_bearer_parses_header() {
        assert_eq!(extract_bearer(Some("Bearer abc123")).unwrap(), "abc123");
    }

    #[test]
    fn extract_bearer_rejects_missing_or_malformed() {
        assert!(extract_bearer(None).is_err());
        assert!(extract_bearer(Some("abc123")).is_err());
        assert!(extract_bearer(Some("Bearer ")).is_err());
    }
}
