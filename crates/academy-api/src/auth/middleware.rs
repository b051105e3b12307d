//! Authentication gate
//!
//! Runs once per request, before any handler:
//!
//! 1. No `Authorization: Bearer` header: the request continues anonymously.
//! 2. A bearer token that fails verification stops the request with 401
//!    (`TOKEN_EXPIRED` or `TOKEN_INVALID`).
//! 3. A valid token whose subject has no account continues anonymously.
//! 4. Otherwise the account is attached as the request's [`SecurityContext`].
//!
//! The gate never writes to storage.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::jwt::TokenError;
use super::models::Account;
use crate::audit::{audit_log, AuditEvent, RequestMeta};
use crate::error::AppError;
use crate::state::AppState;

/// Identity resolved for the current request; empty means anonymous.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub account: Option<Account>,
    /// Bearer token as presented, kept even if no account was resolved
    pub token: Option<String>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    /// The resolved account, or `NoAuthenticatedUser`
    pub fn require_account(&self) -> Result<&Account, AppError> {
        self.account.as_ref().ok_or(AppError::NoAuthenticatedUser)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SecurityContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SecurityContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Token from an `Authorization: Bearer <token>` header, if there is one
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolve the caller's identity and attach it to the request
pub async fn authentication_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        request.extensions_mut().insert(SecurityContext::anonymous());
        return Ok(next.run(request).await);
    };

    let claims = match state.codec.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            audit_log(
                &AuditEvent::InvalidToken {
                    reason: e.to_string(),
                },
                &RequestMeta::from_headers(request.headers()),
            );
            return Err(match e {
                TokenError::Expired => AppError::SessionExpired,
                _ => AppError::SessionInvalid,
            });
        }
    };

    let account = state
        .users
        .find_by_email(&claims.sub)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    if account.is_none() {
        tracing::debug!(subject = %claims.sub, "Valid token for unknown account, continuing anonymously");
    }

    request.extensions_mut().insert(SecurityContext {
        account,
        token: Some(token),
    });

    Ok(next.run(request).await)
}
