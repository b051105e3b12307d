//! One-time checkout token lifecycle
//!
//! ```text
//! ACTIVE --mark_used--> CONSUMED
//!    \
//!     `--clock passes expires_at--> EXPIRED
//! ```
//!
//! EXPIRED is never stored; it is derived from the clock whenever a token
//! is looked at. CONSUMED is terminal and guarded by the store's
//! compare-and-swap in [`CheckoutTokenStore::mark_used`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::models::{CheckoutToken, PendingCheckout, TokenPurpose};
use super::repository::{CheckoutTokenStore, RepositoryError};
use crate::clock::Clock;
use crate::error::AppError;

/// Why a checkout token cannot be redeemed
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Token not found")]
    NotFound,

    #[error("Token has already been used")]
    AlreadyUsed,

    #[error("Token has expired")]
    Expired,

    #[error("Token purpose {actual} does not match {expected}")]
    PurposeMismatch {
        expected: TokenPurpose,
        actual: TokenPurpose,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::NotFound | CheckoutError::PurposeMismatch { .. } => AppError::TokenInvalid,
            CheckoutError::AlreadyUsed => AppError::TokenAlreadyUsed,
            CheckoutError::Expired => AppError::TokenExpired,
            CheckoutError::Repository(e) => AppError::from(e),
        }
    }
}

/// Observable state of a stored token at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Consumed,
    Expired,
}

pub fn state_at(token: &CheckoutToken, now: DateTime<Utc>) -> TokenState {
    if token.used {
        TokenState::Consumed
    } else if token.is_expired_at(now) {
        TokenState::Expired
    } else {
        TokenState::Active
    }
}

/// Decide whether `token` may be redeemed for `expected` at `now`.
///
/// Checks run in a fixed order so the reported error is deterministic:
/// not found, used, expired, purpose mismatch.
pub fn check_redeemable(
    token: Option<CheckoutToken>,
    expected: TokenPurpose,
    now: DateTime<Utc>,
) -> Result<CheckoutToken, CheckoutError> {
    let token = token.ok_or(CheckoutError::NotFound)?;

    match state_at(&token, now) {
        TokenState::Consumed => return Err(CheckoutError::AlreadyUsed),
        TokenState::Expired => return Err(CheckoutError::Expired),
        TokenState::Active => {}
    }

    if token.purpose != expected {
        return Err(CheckoutError::PurposeMismatch {
            expected,
            actual: token.purpose,
        });
    }

    Ok(token)
}

/// Checkout token operations over a store and a clock
#[derive(Clone)]
pub struct CheckoutTokens {
    store: Arc<dyn CheckoutTokenStore>,
    clock: Arc<dyn Clock>,
}

impl CheckoutTokens {
    pub fn new(store: Arc<dyn CheckoutTokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Expiry for a token created now with `ttl_minutes`
    pub fn pending(&self, raw: String, purpose: TokenPurpose, ttl_minutes: i64) -> PendingCheckout {
        PendingCheckout {
            token: raw,
            purpose,
            expires_at: self.clock.now() + Duration::minutes(ttl_minutes),
        }
    }

    /// Insert a new ACTIVE token for `owner_id`.
    pub async fn create(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
        ttl_minutes: i64,
        raw: String,
    ) -> Result<CheckoutToken, CheckoutError> {
        let pending = self.pending(raw, purpose, ttl_minutes);
        Ok(self.store.insert_checkout(owner_id, pending).await?)
    }

    /// Insert a new ACTIVE token and retire every other unused token of the
    /// same `(owner, purpose)` in the same step.
    pub async fn reissue(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
        ttl_minutes: i64,
        raw: String,
    ) -> Result<CheckoutToken, CheckoutError> {
        let pending = self.pending(raw, purpose, ttl_minutes);
        Ok(self.store.reissue_checkout(owner_id, pending).await?)
    }

    pub async fn validate(
        &self,
        raw: &str,
        expected: TokenPurpose,
    ) -> Result<CheckoutToken, CheckoutError> {
        let token = self.store.find_by_token(raw).await?;
        check_redeemable(token, expected, self.clock.now())
    }

    /// Consume `token`. Losing a concurrent race reports `AlreadyUsed`.
    pub async fn mark_used(&self, token: &CheckoutToken) -> Result<(), CheckoutError> {
        match self.store.mark_used(token.id).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::TokenAlreadyUsed) => Err(CheckoutError::AlreadyUsed),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_active(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
    ) -> Result<Option<CheckoutToken>, CheckoutError> {
        Ok(self
            .store
            .find_active(owner_id, purpose, self.clock.now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::NewAccount;
    use crate::auth::repository::AccountStore;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn token(used: bool, purpose: TokenPurpose, expires_at: DateTime<Utc>) -> CheckoutToken {
        let now = Utc::now();
        CheckoutToken {
            id: 1,
            token: "raw".to_string(),
            purpose,
            owner_id: 1,
            expires_at,
            used,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_check_order_not_found_first() {
        let result = check_redeemable(None, TokenPurpose::PasswordReset, Utc::now());
        assert!(matches!(result, Err(CheckoutError::NotFound)));
    }

    #[test]
    fn test_used_reported_before_expired_and_purpose() {
        let now = Utc::now();
        let t = token(true, TokenPurpose::EmailVerification, now - Duration::minutes(1));
        let result = check_redeemable(Some(t), TokenPurpose::PasswordReset, now);
        assert!(matches!(result, Err(CheckoutError::AlreadyUsed)));
    }

    #[test]
    fn test_expired_reported_before_purpose() {
        let now = Utc::now();
        let t = token(false, TokenPurpose::EmailVerification, now);
        let result = check_redeemable(Some(t), TokenPurpose::PasswordReset, now);
        assert!(matches!(result, Err(CheckoutError::Expired)));
    }

    #[test]
    fn test_purpose_mismatch() {
        let now = Utc::now();
        let t = token(false, TokenPurpose::EmailVerification, now + Duration::minutes(5));
        let result = check_redeemable(Some(t), TokenPurpose::PasswordReset, now);
        assert!(matches!(result, Err(CheckoutError::PurposeMismatch { .. })));
        assert!(matches!(
            AppError::from(result.unwrap_err()),
            AppError::TokenInvalid
        ));
    }

    #[test]
    fn test_state_at() {
        let now = Utc::now();
        let t = token(false, TokenPurpose::PasswordReset, now + Duration::minutes(15));
        assert_eq!(state_at(&t, now), TokenState::Active);
        assert_eq!(state_at(&t, now + Duration::minutes(15)), TokenState::Expired);
        assert_eq!(
            state_at(&token(true, TokenPurpose::PasswordReset, now), now),
            TokenState::Consumed
        );
    }

    async fn setup() -> (CheckoutTokens, Arc<ManualClock>, i64) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let tokens = CheckoutTokens::new(store.clone(), clock.clone());

        let pending = tokens.pending("first".to_string(), TokenPurpose::EmailVerification, 15);
        let (account, _) = store
            .register_pending(
                NewAccount::client("alice".into(), "a@x.com".into(), "hash".into()),
                pending,
            )
            .await
            .unwrap();

        (tokens, clock, account.id)
    }

    #[tokio::test]
    async fn test_validate_then_mark_used_twice() {
        let (tokens, _, _) = setup().await;

        let t = tokens
            .validate("first", TokenPurpose::EmailVerification)
            .await
            .unwrap();
        tokens.mark_used(&t).await.unwrap();

        assert!(matches!(
            tokens.validate("first", TokenPurpose::EmailVerification).await,
            Err(CheckoutError::AlreadyUsed)
        ));
        assert!(matches!(
            tokens.mark_used(&t).await,
            Err(CheckoutError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let (tokens, clock, owner) = setup().await;
        tokens
            .create(owner, TokenPurpose::PasswordReset, 15, "reset".to_string())
            .await
            .unwrap();

        clock.advance(Duration::minutes(16));
        assert!(matches!(
            tokens.validate("reset", TokenPurpose::PasswordReset).await,
            Err(CheckoutError::Expired)
        ));
        assert!(tokens
            .find_active(owner, TokenPurpose::PasswordReset)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_active_returns_latest() {
        let (tokens, clock, owner) = setup().await;
        clock.advance(Duration::seconds(1));
        tokens
            .create(owner, TokenPurpose::EmailVerification, 15, "second".to_string())
            .await
            .unwrap();

        let active = tokens
            .find_active(owner, TokenPurpose::EmailVerification)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.token, "second");
    }

    #[tokio::test]
    async fn test_reissue_retires_previous() {
        let (tokens, _, owner) = setup().await;
        tokens
            .create(owner, TokenPurpose::EmailVerification, 15, "second".to_string())
            .await
            .unwrap();

        tokens
            .reissue(owner, TokenPurpose::EmailVerification, 15, "third".to_string())
            .await
            .unwrap();

        for raw in ["first", "second"] {
            assert!(matches!(
                tokens.validate(raw, TokenPurpose::EmailVerification).await,
                Err(CheckoutError::AlreadyUsed)
            ));
        }
        assert!(tokens
            .validate("third", TokenPurpose::EmailVerification)
            .await
            .is_ok());
    }
}
