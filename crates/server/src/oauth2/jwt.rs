//! HS256 bearer tokens keyed by the owning client's secret.
//!
//! A token is only valid under the secret of the client it was issued to, so
//! tokens of two clients never validate against each other.

use crate::error::TokenError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Parameters for a single token.
#[derive(Debug)]
pub struct Sign<'a> {
    pub subject: &'a str,
    pub name: &'a str,
    pub token_type: TokenType,
    pub ttl: Duration,
    pub key: &'a str,
}

#[derive(Clone, Debug)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct TokenSigner {
    issuer: String,
}

impl TokenSigner {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign(&self, req: &Sign<'_>) -> Result<SignedToken, TokenError> {
        self.sign_at(req, OffsetDateTime::now_utc())
    }

    /// Sign with an explicit issue time. `nbf` equals `iat`.
    pub fn sign_at(
        &self,
        req: &Sign<'_>,
        issued_at: OffsetDateTime,
    ) -> Result<SignedToken, TokenError> {
        if req.key.is_empty() {
            return Err(TokenError::EmptyKey);
        }
        let ttl = time::Duration::try_from(req.ttl)
            .map_err(|e| TokenError::Signing(format!("ttl out of range: {e}")))?;
        let expires_at = issued_at
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Signing("expiry out of range".into()))?;
        let iat = issued_at.unix_timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: req.subject.to_string(),
            name: req.name.to_string(),
            token_type: req.token_type,
            iat,
            nbf: iat,
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(req.key.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(SignedToken { token, expires_at })
    }

    /// Verify signature, algorithm, issuer and validity window; return the claims.
    pub fn validate(&self, token: &str, key: &str) -> Result<Claims, TokenError> {
        if key.is_empty() {
            return Err(TokenError::Invalid("empty key".into()));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);

        let data = decode::<Claims>(token, &DecodingKey::from_secret(key.as_bytes()), &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let claims = data.claims;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if claims.exp <= now {
            return Err(TokenError::Invalid("token expired".into()));
        }
        if claims.iat > now {
            return Err(TokenError::Invalid("token issued in the future".into()));
        }
        Ok(claims)
    }
}
