//! Persistence contracts for accounts and checkout tokens
//!
//! The service layer only ever talks to these traits. Two implementations
//! exist: [`super::memory::MemoryStore`] and [`super::postgres::PgStore`].
//! Both must give the same guarantees:
//!
//! - email and username are unique, compared case-insensitively
//! - checkout token strings are unique
//! - `mark_used` flips `used` at most once, even under concurrent callers
//! - `register_pending` stores an account and its first checkout token
//!   together or not at all
//! - every `redeem_*` call consumes its token and applies the account change
//!   in one unit; on any failure neither is visible
//! - `reissue_checkout` leaves exactly one unused token per (owner, purpose)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{Account, CheckoutToken, NewAccount, PendingCheckout, Role, TokenPurpose};

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Username already exists")]
    UsernameAlreadyExists,

    #[error("Token already exists")]
    DuplicateToken,

    #[error("Token has already been used")]
    TokenAlreadyUsed,

    #[error("Account is already verified")]
    AlreadyVerified,

    #[error("Record not found")]
    NotFound,

    /// Any other unique constraint, named by what collided
    #[error("Conflict on {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

/// Account identity, role and verification flag
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError>;

    /// Case-insensitive lookup
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, RepositoryError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn update_username(&self, id: i64, username: &str) -> Result<Account, RepositoryError>;

    async fn update_role(&self, id: i64, role: Role) -> Result<Account, RepositoryError>;
}

/// Raw storage of one-time tokens; the state machine lives in `checkout`.
#[async_trait]
pub trait CheckoutTokenStore: Send + Sync {
    async fn insert_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<CheckoutToken>, RepositoryError>;

    /// Compare-and-swap `used` from false to true.
    ///
    /// Fails with [`RepositoryError::TokenAlreadyUsed`] when the row was
    /// already used, which is how a lost race between two redeemers shows up.
    async fn mark_used(&self, token_id: i64) -> Result<(), RepositoryError>;

    /// Most recently created unused token for `(owner, purpose)` that has not
    /// expired at `now`.
    async fn find_active(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckoutToken>, RepositoryError>;

    /// Mark every unused token of `(owner, pending.purpose)` as used and
    /// insert `pending`, atomically. Concurrent reissues for one owner are
    /// serialized.
    async fn reissue_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError>;
}

/// Everything the account lifecycle needs from storage
#[async_trait]
pub trait AccountStore: UserDirectory + CheckoutTokenStore {
    /// Insert an unverified account together with its first checkout token.
    async fn register_pending(
        &self,
        account: NewAccount,
        checkout: PendingCheckout,
    ) -> Result<(Account, CheckoutToken), RepositoryError>;

    /// Delete an account that is still unverified, together with its tokens.
    /// Returns false when there was nothing to delete.
    async fn discard_unverified(&self, account_id: i64) -> Result<bool, RepositoryError>;

    /// Consume an EMAIL_VERIFICATION token, verify its owner and create the
    /// owner's learning progression record.
    ///
    /// A lost race shows up as [`RepositoryError::TokenAlreadyUsed`] or
    /// [`RepositoryError::AlreadyVerified`].
    async fn redeem_email_verification(
        &self,
        token_id: i64,
        account_id: i64,
    ) -> Result<Account, RepositoryError>;

    /// Consume a PASSWORD_RESET token and store the new password hash.
    async fn redeem_password_reset(
        &self,
        token_id: i64,
        account_id: i64,
        password_hash: &str,
    ) -> Result<Account, RepositoryError>;
}
