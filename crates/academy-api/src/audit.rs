//! Security audit logging for account events
//!
//! Audit events are logged at INFO level with the "audit" target so they
//! can be filtered and routed apart from application logs. Records never
//! carry passwords, password hashes or raw tokens.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::info;
use uuid::Uuid;

/// Security-relevant account events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        role: String,
    },

    RegistrationFailure {
        email: String,
        reason: String,
    },

    LoginSuccess {
        user_id: Uuid,
        email: String,
    },

    /// `identifier` is whichever of email or username was submitted
    LoginFailure {
        identifier: String,
        reason: String,
    },

    EmailVerified {
        user_id: Uuid,
        email: String,
    },

    PasswordResetRequested {
        email: String,
        account_found: bool,
    },

    PasswordResetCompleted {
        user_id: Uuid,
        email: String,
    },

    CheckoutResent {
        user_id: Uuid,
        email: String,
        purpose: String,
    },

    UsernameChanged {
        user_id: Uuid,
        username: String,
    },

    /// Authenticated (or anonymous) caller lacked the required role
    AccessDenied {
        user_id: Option<Uuid>,
        email: Option<String>,
        resource: String,
        required_role: String,
    },

    /// Session token rejected at the gate
    InvalidToken {
        reason: String,
    },
}

impl AuditEvent {
    fn message(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::EmailVerified { .. } => "Email verified",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::CheckoutResent { .. } => "Checkout token resent",
            AuditEvent::UsernameChanged { .. } => "Username changed",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }
}

/// Client metadata attached to audit records
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// What actually gets serialized: the event plus when and from where
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a AuditEvent,
    #[serde(flatten)]
    meta: &'a RequestMeta,
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent, meta: &RequestMeta) {
    let record = AuditRecord {
        timestamp: Utc::now(),
        event,
        meta,
    };

    let event_json = serde_json::to_string(&record)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        event = %event_json,
        ip_address = ?meta.ip_address,
        user_agent = ?meta.user_agent,
        "{}",
        event.message()
    );
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
