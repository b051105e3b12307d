//! Signed token issuance and verification
//!
//! Compact HMAC-SHA256 JWTs carrying a subject (the account email), an
//! issued-at time, free-form claims and an optional expiry. Session tokens
//! are issued without expiry; tokens that seed a checkout record carry the
//! same short window as the record itself.
//!
//! Expiry is checked against the injected [`Clock`] rather than by the
//! `jsonwebtoken` validator, so it can be exercised without sleeping.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Account, TokenPurpose};
use crate::clock::Clock;

/// Minimum signing key length in bytes (HS256 block size).
pub const MIN_KEY_LEN: usize = 32;

/// Category tag written into the `type` claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenCategory {
    Auth,
    PasswordReset,
    EmailVerification,
}

impl From<TokenPurpose> for TokenCategory {
    fn from(purpose: TokenPurpose) -> Self {
        match purpose {
            TokenPurpose::EmailVerification => TokenCategory::EmailVerification,
            TokenPurpose::PasswordReset => TokenCategory::PasswordReset,
        }
    }
}

/// Decoded token contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Issuer, checked on verification
    pub iss: String,
    /// Subject - account email
    pub sub: String,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds); absent for session tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Everything else
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn category(&self) -> Option<TokenCategory> {
        self.claim("type")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Token codec errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Signing key must be at least {MIN_KEY_LEN} bytes")]
    WeakKey,

    #[error("Failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("Token has expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,
}

/// Issues and verifies signed tokens with one shared secret.
#[derive(Clone)]
pub struct SignedTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SignedTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl SignedTokenCodec {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        if secret.len() < MIN_KEY_LEN {
            return Err(TokenError::WeakKey);
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            clock,
        })
    }

    /// Sign `subject` and `claims`, expiring `ttl_minutes` from now when given.
    pub fn issue(
        &self,
        subject: &str,
        claims: Map<String, Value>,
        ttl_minutes: Option<i64>,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();

        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: ttl_minutes.map(|m| (now + Duration::minutes(m)).timestamp()),
            extra: claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Check signature, issuer and expiry and return the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["iss", "sub"]);
        validation.validate_exp = false;

        let token_data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            }
        })?;

        let claims = token_data.claims;
        if let Some(exp) = claims.exp {
            if self.clock.now().timestamp() >= exp {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }

    /// Verify `token` and return one claim, `sub` included.
    pub fn extract_claim(&self, token: &str, key: &str) -> Result<Option<Value>, TokenError> {
        let claims = self.verify(token)?;
        let value = match key {
            "sub" => Some(Value::String(claims.sub)),
            "iss" => Some(Value::String(claims.iss)),
            "iat" => Some(Value::from(claims.iat)),
            "exp" => claims.exp.map(Value::from),
            _ => claims.extra.get(key).cloned(),
        };
        Ok(value)
    }

    /// Non-expiring AUTH token for an authenticated account
    pub fn issue_session_token(&self, account: &Account) -> Result<String, TokenError> {
        let mut claims = Map::new();
        claims.insert("id".to_string(), Value::from(account.id));
        claims.insert("uuid".to_string(), Value::String(account.uuid.to_string()));
        claims.insert("role".to_string(), Value::String(account.role.to_string()));
        claims.insert("type".to_string(), category_value(TokenCategory::Auth));

        self.issue(&account.email, claims, None)
    }

    /// Short-lived token whose string becomes the raw value of a checkout record
    pub fn issue_checkout_seed(
        &self,
        email: &str,
        purpose: TokenPurpose,
        ttl_minutes: i64,
    ) -> Result<String, TokenError> {
        let mut claims = Map::new();
        claims.insert(
            "type".to_string(),
            category_value(TokenCategory::from(purpose)),
        );

        self.issue(email, claims, Some(ttl_minutes))
    }
}

fn category_value(category: TokenCategory) -> Value {
    serde_json::to_value(category).unwrap_or(Value::Null)
}
