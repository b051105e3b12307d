//! Category catalog
//!
//! Reads are public; creating and deleting categories is reserved for
//! ADMIN accounts and goes through the authorization policy.

pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::repository::RepositoryError;

pub use service::CatalogService;

/// Persisted category
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    /// Trimmed and lowercased
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

/// Parent reference in a category view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CategoryRef {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Category with its parent and the full subtree below it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent: Option<CategoryRef>,
    pub children: Vec<CategoryView>,
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError>;

    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError>;

    async fn find_category_by_id(&self, id: i64) -> Result<Option<Category>, RepositoryError>;

    async fn category_name_exists(&self, name: &str) -> Result<bool, RepositoryError>;

    /// Fails with `Conflict` when the name or slug is taken.
    async fn insert_category(&self, category: NewCategory) -> Result<Category, RepositoryError>;

    /// Delete by id; direct children become roots. Returns false if absent.
    async fn delete_category(&self, id: i64) -> Result<bool, RepositoryError>;
}
