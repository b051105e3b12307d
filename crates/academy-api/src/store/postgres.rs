//! PostgreSQL store
//!
//! Uniqueness lives in unique indexes (see `migrations/`), so concurrent
//! writers race safely: the loser gets a unique violation, translated here
//! by index name. Token consumption is a conditional update on `used`, and
//! every redemption runs that update in the same transaction as the account
//! change it unlocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::auth::models::{
    Account, CheckoutToken, NewAccount, PendingCheckout, Role, TokenPurpose,
};
use crate::auth::repository::{AccountStore, CheckoutTokenStore, RepositoryError, UserDirectory};
use crate::catalog::{Category, CategoryStore, NewCategory};

/// Embedded schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ACCOUNT_COLUMNS: &str =
    "id, uuid, username, email, password_hash, verified, enabled, role, created_at, updated_at";

const CHECKOUT_COLUMNS: &str =
    "id, token, purpose, owner_id, expires_at, used, created_at, updated_at";

const CATEGORY_COLUMNS: &str = "id, name, slug, description, parent_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: i64,
    uuid: Uuid,
    username: String,
    email: String,
    password_hash: Option<String>,
    verified: bool,
    enabled: bool,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = RepositoryError;

    fn try_from(r: AccountRecord) -> Result<Self, Self::Error> {
        Ok(Account {
            id: r.id,
            uuid: r.uuid,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            verified: r.verified,
            enabled: r.enabled,
            role: r.role.parse().map_err(RepositoryError::Database)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CheckoutRecord {
    id: i64,
    token: String,
    purpose: String,
    owner_id: i64,
    expires_at: DateTime<Utc>,
    used: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CheckoutRecord> for CheckoutToken {
    type Error = RepositoryError;

    fn try_from(r: CheckoutRecord) -> Result<Self, Self::Error> {
        Ok(CheckoutToken {
            id: r.id,
            token: r.token,
            purpose: r.purpose.parse().map_err(RepositoryError::Database)?,
            owner_id: r.owner_id,
            expires_at: r.expires_at,
            used: r.used,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CategoryRecord {
    id: i64,
    name: String,
    slug: String,
    description: Option<String>,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CategoryRecord> for Category {
    fn from(r: CategoryRecord) -> Self {
        Category {
            id: r.id,
            name: r.name,
            slug: r.slug,
            description: r.description,
            parent_id: r.parent_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Translate unique violations into domain errors by index name.
fn map_db_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some("accounts_email_lower_key") => RepositoryError::EmailAlreadyExists,
                Some("accounts_username_lower_key") => RepositoryError::UsernameAlreadyExists,
                Some("checkout_tokens_token_key") => RepositoryError::DuplicateToken,
                Some("categories_name_key") => RepositoryError::Conflict("name".to_string()),
                Some("categories_slug_key") => RepositoryError::Conflict("slug".to_string()),
                other => RepositoryError::Conflict(other.unwrap_or("unique key").to_string()),
            };
        }
    }
    RepositoryError::from(e)
}

/// Compare-and-swap `used` from false to true on `conn`.
async fn claim_checkout(conn: &mut PgConnection, token_id: i64) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE checkout_tokens SET used = TRUE, updated_at = NOW() WHERE id = $1 AND used = FALSE",
    )
    .bind(token_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM checkout_tokens WHERE id = $1)")
            .bind(token_id)
            .fetch_one(&mut *conn)
            .await?;
    if exists {
        Err(RepositoryError::TokenAlreadyUsed)
    } else {
        Err(RepositoryError::NotFound)
    }
}

async fn account_exists(conn: &mut PgConnection, id: i64) -> Result<bool, RepositoryError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn has_progression(&self, account_id: i64) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM progressions WHERE account_id = $1)")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn fetch_account(&self, sql: &str, value: &str) -> Result<Option<Account>, RepositoryError> {
        sqlx::query_as::<_, AccountRecord>(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(email) = lower($1)");
        self.fetch_account(&sql, email.trim()).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, RepositoryError> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(username) = lower($1)");
        self.fetch_account(&sql, username.trim()).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE lower(email) = lower($1))",
        )
        .bind(email.trim())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE lower(username) = lower($1))",
        )
        .bind(username.trim())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn update_username(&self, id: i64, username: &str) -> Result<Account, RepositoryError> {
        let sql = format!(
            "UPDATE accounts SET username = $2, updated_at = NOW() WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(id)
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Account::try_from(record)
    }

    async fn update_role(&self, id: i64, role: Role) -> Result<Account, RepositoryError> {
        let sql = format!(
            "UPDATE accounts SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?;
        Account::try_from(record)
    }
}

#[async_trait]
impl CheckoutTokenStore for PgStore {
    async fn insert_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError> {
        let sql = format!(
            "INSERT INTO checkout_tokens (token, purpose, owner_id, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {CHECKOUT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, CheckoutRecord>(&sql)
            .bind(&pending.token)
            .bind(pending.purpose.as_str())
            .bind(owner_id)
            .bind(pending.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        CheckoutToken::try_from(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<CheckoutToken>, RepositoryError> {
        let sql = format!("SELECT {CHECKOUT_COLUMNS} FROM checkout_tokens WHERE token = $1");
        sqlx::query_as::<_, CheckoutRecord>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutToken::try_from)
            .transpose()
    }

    async fn mark_used(&self, token_id: i64) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        claim_checkout(&mut conn, token_id).await
    }

    async fn find_active(
        &self,
        owner_id: i64,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckoutToken>, RepositoryError> {
        let sql = format!(
            "SELECT {CHECKOUT_COLUMNS} FROM checkout_tokens \
             WHERE owner_id = $1 AND purpose = $2 AND used = FALSE AND expires_at > $3 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, CheckoutRecord>(&sql)
            .bind(owner_id)
            .bind(purpose.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutToken::try_from)
            .transpose()
    }

    async fn reissue_checkout(
        &self,
        owner_id: i64,
        pending: PendingCheckout,
    ) -> Result<CheckoutToken, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The row lock makes a concurrent reissue wait and then see our token.
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owner.is_none() {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "UPDATE checkout_tokens SET used = TRUE, updated_at = NOW() \
             WHERE owner_id = $1 AND purpose = $2 AND used = FALSE",
        )
        .bind(owner_id)
        .bind(pending.purpose.as_str())
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO checkout_tokens (token, purpose, owner_id, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {CHECKOUT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, CheckoutRecord>(&sql)
            .bind(&pending.token)
            .bind(pending.purpose.as_str())
            .bind(owner_id)
            .bind(pending.expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await?;
        CheckoutToken::try_from(record)
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn register_pending(
        &self,
        account: NewAccount,
        checkout: PendingCheckout,
    ) -> Result<(Account, CheckoutToken), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO accounts (uuid, username, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLUMNS}"
        );
        let account_record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(account.uuid)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let sql = format!(
            "INSERT INTO checkout_tokens (token, purpose, owner_id, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {CHECKOUT_COLUMNS}"
        );
        let checkout_record = sqlx::query_as::<_, CheckoutRecord>(&sql)
            .bind(&checkout.token)
            .bind(checkout.purpose.as_str())
            .bind(account_record.id)
            .bind(checkout.expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await?;

        Ok((
            Account::try_from(account_record)?,
            CheckoutToken::try_from(checkout_record)?,
        ))
    }

    async fn discard_unverified(&self, account_id: i64) -> Result<bool, RepositoryError> {
        // Tokens and progressions go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1 AND verified = FALSE")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn redeem_email_verification(
        &self,
        token_id: i64,
        account_id: i64,
    ) -> Result<Account, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        claim_checkout(&mut tx, token_id).await?;

        let sql = format!(
            "UPDATE accounts SET verified = TRUE, updated_at = NOW() \
             WHERE id = $1 AND verified = FALSE RETURNING {ACCOUNT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(record) = record else {
            // Dropping `tx` rolls the token claim back.
            return Err(if account_exists(&mut tx, account_id).await? {
                RepositoryError::AlreadyVerified
            } else {
                RepositoryError::NotFound
            });
        };

        sqlx::query(
            "INSERT INTO progressions (account_id) VALUES ($1) ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Account::try_from(record)
    }

    async fn redeem_password_reset(
        &self,
        token_id: i64,
        account_id: i64,
        password_hash: &str,
    ) -> Result<Account, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        claim_checkout(&mut tx, token_id).await?;

        let sql = format!(
            "UPDATE accounts SET password_hash = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(account_id)
            .bind(password_hash)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        tx.commit().await?;
        Account::try_from(record)
    }
}

#[async_trait]
impl CategoryStore for PgStore {
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name");
        let records = sqlx::query_as::<_, CategoryRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(Category::from).collect())
    }

    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = $1");
        let record = sqlx::query_as::<_, CategoryRecord>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(Category::from))
    }

    async fn find_category_by_id(&self, id: i64) -> Result<Option<Category>, RepositoryError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        let record = sqlx::query_as::<_, CategoryRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(Category::from))
    }

    async fn category_name_exists(&self, name: &str) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE name = $1)")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_category(&self, category: NewCategory) -> Result<Category, RepositoryError> {
        let sql = format!(
            "INSERT INTO categories (name, slug, description, parent_id) \
             VALUES ($1, $2, $3, $4) RETURNING {CATEGORY_COLUMNS}"
        );
        let record = sqlx::query_as::<_, CategoryRecord>(&sql)
            .bind(&category.name)
            .bind(&category.slug)
            .bind(&category.description)
            .bind(category.parent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(Category::from(record))
    }

    async fn delete_category(&self, id: i64) -> Result<bool, RepositoryError> {
        // Children are detached by the ON DELETE SET NULL foreign key.
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
