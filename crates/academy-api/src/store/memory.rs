//! In-memory store
//!
//! Every table sits behind one mutex, so each trait method is atomic the
//! same way a single SQL statement or transaction is in `PgStore`.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::models::{
    Account, CheckoutToken, NewAccount, PendingCheckout, Role, TokenPurpose,
};
use crate::auth::repository::{AccountStore, CheckoutTokenStore, RepositoryError, UserDirectory};
use crate::catalog::{Category, CategoryStore, NewCategory};

#[derive(Debug, Default)]
struct Tables {
    accounts: Vec<Account>,
    checkouts: Vec<CheckoutToken>,
    progressions: HashSet<i64>,
    categories: Vec<Category>,
    next_id: i64,
    fail_progressions: bool,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_mut(&mut self, id: i64) -> Result<&mut Account, RepositoryError> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(RepositoryError::NotFound)
    }

    /// The token if it exists and is still unused
    fn unused_checkout_mut(&mut self, id: i64) -> Result<&mut CheckoutToken, RepositoryError> {
        let token = self
            .checkouts
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RepositoryError::NotFound)?;
        if token.used {
            return Err(RepositoryError::TokenAlreadyUsed);
        }
        Ok(token)
    }

    fn consume_checkout(&mut self, id: i64, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let token = self.unused_checkout_mut(id)?;
        token.used = true;
        token.updated_at = now;
        Ok(())
    }

    fn insert_progression(&mut self, account_id: i64) -> Result<(), RepositoryError> {
        if self.fail_progressions {
            return Err(RepositoryError::Database(
                "progression insert rejected".to_string(),
            ));
        }
        self.progressions.insert(account_id);
        Ok(())
    }

    fn check_account_unique(
        &self,
        email: &str,
        username: &str,
        except: Option<i64>,
    ) -> Result<(), RepositoryError> {
        let others = self.accounts.iter().filter(|a| Some(a.id) != except);
        for account in others {
            if account.email.eq_ignore_ascii_case(email) {
                return Err(RepositoryError::EmailAlreadyExists);
            }
            if account.username.to_lowercase() == username.to_lowercase() {
                return Err(RepositoryError::UsernameAlreadyExists);
            }
        }
        Ok(())
    }

    fn insert_checkout(
        &mut self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError> {
        if self.checkouts.iter().any(|t| t.token == pending.token) {
            return Err(RepositoryError::DuplicateToken);
        }

        let now = Utc::now();
        let token = CheckoutToken {
            id: self.next_id(),
            token: pending.token,
            purpose: pending.purpose,
            owner_id,
            expires_at: pending.expires_at,
            used: false,
            created_at: now,
            updated_at: now,
        };
        self.checkouts.push(token.clone());
        Ok(token)
    }
}

/// Store backed by process memory; contents vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All checkout tokens of an account, oldest first
    pub fn checkouts_for(&self, owner_id: i64) -> Vec<CheckoutToken> {
        self.lock()
            .checkouts
            .iter()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn has_progression(&self, account_id: i64) -> bool {
        self.lock().progressions.contains(&account_id)
    }

    /// Make progression inserts fail like a broken database would.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_failing_progressions(&self, failing: bool) {
        self.lock().fail_progressions = failing;
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, RepositoryError> {
        let wanted = username.trim().to_lowercase();
        Ok(self
            .lock()
            .accounts
            .iter()
            .find(|a| a.username.to_lowercase() == wanted)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, RepositoryError> {
        Ok(self.lock().accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn update_username(&self, id: i64, username: &str) -> Result<Account, RepositoryError> {
        let mut tables = self.lock();
        let email = tables
            .accounts
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.email.clone())
            .ok_or(RepositoryError::NotFound)?;
        tables.check_account_unique(&email, username, Some(id))?;

        let account = tables.account_mut(id)?;
        account.username = username.to_string();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn update_role(&self, id: i64, role: Role) -> Result<Account, RepositoryError> {
        let mut tables = self.lock();
        let account = tables.account_mut(id)?;
        account.role = role;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }
}

#[async_trait]
impl CheckoutTokenStore for MemoryStore {
    async fn insert_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError> {
        let mut tables = self.lock();
        if !tables.accounts.iter().any(|a| a.id == owner_id) {
            return Err(RepositoryError::NotFound);
        }
        tables.insert_checkout(owner_id, pending)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<CheckoutToken>, RepositoryError> {
        Ok(self
            .lock()
            .checkouts
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn mark_used(&self, token_id: i64) -> Result<(), RepositoryError> {
        self.lock().consume_checkout(token_id, Utc::now())
    }

    async fn find_active(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckoutToken>, RepositoryError> {
        Ok(self
            .lock()
            .checkouts
            .iter()
            .filter(|t| {
                t.owner_id == owner_id && t.purpose == purpose && !t.used && !t.is_expired_at(now)
            })
            .max_by_key(|t| (t.created_at, t.id))
            .cloned())
    }

    async fn reissue_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError> {
        let mut tables = self.lock();
        if !tables.accounts.iter().any(|a| a.id == owner_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.checkouts.iter().any(|t| t.token == pending.token) {
            return Err(RepositoryError::DuplicateToken);
        }

        let now = Utc::now();
        let purpose = pending.purpose;
        for token in tables
            .checkouts
            .iter_mut()
            .filter(|t| t.owner_id == owner_id && t.purpose == purpose && !t.used)
        {
            token.used = true;
            token.updated_at = now;
        }
        tables.insert_checkout(owner_id, pending)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn register_pending(
        &self,
        account: NewAccount,
        checkout: PendingCheckout,
    ) -> Result<(Account, CheckoutToken), RepositoryError> {
        let mut tables = self.lock();
        tables.check_account_unique(&account.email, &account.username, None)?;
        if tables.checkouts.iter().any(|t| t.token == checkout.token) {
            return Err(RepositoryError::DuplicateToken);
        }

        let now = Utc::now();
        let created = Account {
            id: tables.next_id(),
            uuid: account.uuid,
            username: account.username,
            email: account.email,
            password_hash: Some(account.password_hash),
            verified: false,
            enabled: true,
            role: account.role,
            created_at: now,
            updated_at: now,
        };
        tables.accounts.push(created.clone());

        let token = tables.insert_checkout(created.id, checkout)?;
        Ok((created, token))
    }

    async fn discard_unverified(&self, account_id: i64) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        let before = tables.accounts.len();
        tables.accounts.retain(|a| a.id != account_id || a.verified);
        if tables.accounts.len() == before {
            return Ok(false);
        }

        tables.checkouts.retain(|t| t.owner_id != account_id);
        tables.progressions.remove(&account_id);
        Ok(true)
    }

    async fn redeem_email_verification(
        &self,
        token_id: i64,
        account_id: i64,
    ) -> Result<Account, RepositoryError> {
        let mut tables = self.lock();

        // Every check and fallible write happens before the first mutation.
        tables.unused_checkout_mut(token_id)?;
        if tables.account_mut(account_id)?.verified {
            return Err(RepositoryError::AlreadyVerified);
        }
        tables.insert_progression(account_id)?;

        let now = Utc::now();
        tables.consume_checkout(token_id, now)?;
        let account = tables.account_mut(account_id)?;
        account.verified = true;
        account.updated_at = now;
        Ok(account.clone())
    }

    async fn redeem_password_reset(
        &self,
        token_id: i64,
        account_id: i64,
        password_hash: &str,
    ) -> Result<Account, RepositoryError> {
        let mut tables = self.lock();
        tables.unused_checkout_mut(token_id)?;
        tables.account_mut(account_id)?;

        let now = Utc::now();
        tables.consume_checkout(token_id, now)?;
        let account = tables.account_mut(account_id)?;
        account.password_hash = Some(password_hash.to_string());
        account.updated_at = now;
        Ok(account.clone())
    }
}

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let mut categories = self.lock().categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError> {
        Ok(self
            .lock()
            .categories
            .iter()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn find_category_by_id(&self, id: i64) -> Result<Option<Category>, RepositoryError> {
        Ok(self.lock().categories.iter().find(|c| c.id == id).cloned())
    }

    async fn category_name_exists(&self, name: &str) -> Result<bool, RepositoryError> {
        Ok(self.lock().categories.iter().any(|c| c.name == name))
    }

    async fn insert_category(&self, category: NewCategory) -> Result<Category, RepositoryError> {
        let mut tables = self.lock();
        if tables.categories.iter().any(|c| c.name == category.name) {
            return Err(RepositoryError::Conflict("name".to_string()));
        }
        if tables.categories.iter().any(|c| c.slug == category.slug) {
            return Err(RepositoryError::Conflict("slug".to_string()));
        }

        let now = Utc::now();
        let created = Category {
            id: tables.next_id(),
            name: category.name,
            slug: category.slug,
            description: category.description,
            parent_id: category.parent_id,
            created_at: now,
            updated_at: now,
        };
        tables.categories.push(created.clone());
        Ok(created)
    }

    async fn delete_category(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        let before = tables.categories.len();
        tables.categories.retain(|c| c.id != id);
        if tables.categories.len() == before {
            return Ok(false);
        }

        for child in tables.categories.iter_mut().filter(|c| c.parent_id == Some(id)) {
            child.parent_id = None;
        }
        Ok(true)
    }
}
