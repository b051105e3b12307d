//! Category catalog operations

use std::collections::HashSet;
use std::sync::Arc;

use academy_core::{slugify, unique_slug};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::{Category, CategoryRef, CategoryStore, CategoryView, NewCategory};
use crate::error::AppError;

/// Create category request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 1, max = 2000, message = "Description is required"))]
    pub description: String,

    /// Parent category id; root category when absent
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CategoryStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CategoryStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateCategoryRequest) -> Result<CategoryView, AppError> {
        let name = request.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AppError::BadRequest("Category name cannot be blank".to_string()));
        }

        if self.store.category_name_exists(&name).await? {
            return Err(AppError::CategoryAlreadyExists(
                "Category already exists".to_string(),
            ));
        }

        let base = slugify(&name);
        if base.is_empty() {
            return Err(AppError::BadRequest(
                "Category name must contain letters or digits".to_string(),
            ));
        }

        let all = self.store.list_categories().await?;
        let taken: HashSet<&str> = all.iter().map(|c| c.slug.as_str()).collect();
        let slug = unique_slug(&base, |candidate| taken.contains(candidate));

        if let Some(parent_id) = request.parent_id {
            if !all.iter().any(|c| c.id == parent_id) {
                return Err(AppError::NotFound("Parent category".to_string()));
            }
        }

        let created = self
            .store
            .insert_category(NewCategory {
                name,
                slug,
                description: Some(request.description.trim().to_string()),
                parent_id: request.parent_id,
            })
            .await?;

        tracing::info!(slug = %created.slug, "Category created");

        let mut all = all;
        all.push(created.clone());
        Ok(build_view(&created, &all, true))
    }

    /// Root categories, each with its subtree
    pub async fn list_tree(&self) -> Result<Vec<CategoryView>, AppError> {
        let all = self.store.list_categories().await?;
        Ok(all
            .iter()
            .filter(|c| c.parent_id.is_none())
            .map(|root| build_view(root, &all, false))
            .collect())
    }

    pub async fn get(&self, slug: &str) -> Result<CategoryView, AppError> {
        let category = self
            .store
            .find_category_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::NotFound("Category".to_string()))?;

        let all = self.store.list_categories().await?;
        Ok(build_view(&category, &all, true))
    }

    pub async fn delete(&self, slug: &str) -> Result<String, AppError> {
        let category = self
            .store
            .find_category_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::NotFound("Category".to_string()))?;

        if !self.store.delete_category(category.id).await? {
            return Err(AppError::NotFound("Category".to_string()));
        }

        tracing::info!(slug, "Category deleted");
        Ok("Category deleted".to_string())
    }
}

fn build_view(category: &Category, all: &[Category], include_parent: bool) -> CategoryView {
    let parent = if include_parent {
        category
            .parent_id
            .and_then(|pid| all.iter().find(|c| c.id == pid))
            .map(|p| CategoryRef {
                id: p.id,
                name: p.name.clone(),
                slug: p.slug.clone(),
            })
    } else {
        None
    };

    let mut children: Vec<CategoryView> = all
        .iter()
        .filter(|c| c.parent_id == Some(category.id))
        .map(|child| build_view(child, all, false))
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));

    CategoryView {
        id: category.id,
        name: category.name.clone(),
        slug: category.slug.clone(),
        description: category.description.clone(),
        parent,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> CatalogService {
        CatalogService::new(Arc::new(MemoryStore::new()))
    }

    fn request(name: &str, parent_id: Option<i64>) -> CreateCategoryRequest {
        CreateCategoryRequest {
            name: name.to_string(),
            description: "desc".to_string(),
            parent_id,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_slugs() {
        let catalog = service();
        let view = catalog.create(request("  Backend Development ", None)).await.unwrap();

        assert_eq!(view.name, "backend development");
        assert_eq!(view.slug, "backend-development");
        assert!(view.parent.is_none());
    }

    #[tokio::test]
    async fn test_non_latin_names_get_a_slug() {
        let catalog = service();
        let view = catalog.create(request("البرمجة", None)).await.unwrap();

        assert!(!view.slug.is_empty());
        assert!(view.slug.is_ascii());
        assert_eq!(catalog.get(&view.slug).await.unwrap().id, view.id);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let catalog = service();
        catalog.create(request("Rust", None)).await.unwrap();

        let err = catalog.create(request("RUST", None)).await.unwrap_err();
        assert!(matches!(err, AppError::CategoryAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_slug_collision_gets_suffix() {
        let catalog = service();
        catalog.create(request("Rust", None)).await.unwrap();

        let view = catalog.create(request("Rust!", None)).await.unwrap();
        assert_eq!(view.slug, "rust-1");
    }

    #[tokio::test]
    async fn test_tree_and_delete() {
        let catalog = service();
        let root = catalog.create(request("Programming", None)).await.unwrap();
        let child = catalog.create(request("Rust", Some(root.id))).await.unwrap();

        assert_eq!(child.parent.as_ref().unwrap().slug, "programming");

        let tree = catalog.list_tree().await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].slug, "rust");

        catalog.delete("programming").await.unwrap();
        let tree = catalog.list_tree().await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].slug, "rust");

        assert!(matches!(
            catalog.get("programming").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_parent() {
        let err = service().create(request("Rust", Some(99))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
