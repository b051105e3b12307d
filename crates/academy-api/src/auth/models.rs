//! Account and checkout token models
//!
//! - Account: identity, credentials and role of a user
//! - CheckoutToken: one-time proof scoped to a purpose (verify email, reset password)
//! - UserView / AuthResponse: what the API hands back to clients
//!
//! Tokens reference their owner by id only; there is no embedded object graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Account role
///
/// - Client: regular learner account, the role every registration starts with
/// - Admin: may mutate the catalog
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CLIENT" => Ok(Role::Client),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a checkout token may be redeemed for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "EMAIL_VERIFICATION",
            TokenPurpose::PasswordReset => "PASSWORD_RESET",
        }
    }
}

impl FromStr for TokenPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EMAIL_VERIFICATION" => Ok(TokenPurpose::EmailVerification),
            "PASSWORD_RESET" => Ok(TokenPurpose::PasswordReset),
            other => Err(format!("unsupported token purpose: {other}")),
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted account
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Storage id
    pub id: i64,

    /// Public identifier, never changes
    pub uuid: Uuid,

    pub username: String,

    /// Always stored trimmed and lowercased
    pub email: String,

    /// Argon2id PHC string
    pub password_hash: Option<String>,

    pub verified: bool,

    pub enabled: bool,

    pub role: Role,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn to_view(&self) -> UserView {
        UserView::from(self)
    }
}

/// Account fields supplied by the caller on insert; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub uuid: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

impl NewAccount {
    /// Unverified CLIENT account with a fresh public id
    pub fn client(username: String, email: String, password_hash: String) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            username,
            email,
            password_hash,
            role: Role::Client,
        }
    }
}

/// Persisted one-time token
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutToken {
    pub id: i64,

    /// Opaque token string; globally unique
    pub token: String,

    pub purpose: TokenPurpose,

    /// Owning account id (back-reference only)
    pub owner_id: i64,

    pub expires_at: DateTime<Utc>,

    pub used: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CheckoutToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A checkout token to be inserted for an account that does not have an id yet
#[derive(Debug, Clone)]
pub struct PendingCheckout {
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

/// Public account representation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub uuid: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for UserView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            uuid: account.uuid,
            username: account.username.clone(),
            email: account.email.clone(),
            role: account.role,
            verified: account.verified,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Account view paired with a session token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserView,
    pub token: String,
}

/// Lowercase and trim an email address for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
