//! Category catalog handlers
//!
//! Create and delete are mounted behind `require_role(Role::Admin)`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::catalog::service::CreateCategoryRequest;
use crate::error::{created, ok, AppError};
use crate::extract::ValidatedJson;
use crate::state::AppState;

/// Category tree, roots first
#[utoipa::path(
    get,
    path = "/api/category",
    tag = "category",
    responses(
        (status = 200, description = "All root categories with their subtrees", body = [crate::catalog::CategoryView]),
    )
)]
pub async fn list_categories_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.catalog.list_tree().await?))
}

#[utoipa::path(
    get,
    path = "/api/category/{slug}",
    tag = "category",
    params(("slug" = String, Path, description = "Category slug")),
    responses(
        (status = 200, description = "Category with parent and subtree", body = crate::catalog::CategoryView),
        (status = 404, description = "Unknown slug", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn get_category_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.catalog.get(&slug).await?))
}

/// Create a category (ADMIN)
#[utoipa::path(
    post,
    path = "/api/category",
    tag = "category",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created", body = crate::catalog::CategoryView),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorEnvelope),
        (status = 403, description = "ADMIN role required", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Name already taken", body = crate::error::ErrorEnvelope),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_category_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(state.catalog.create(request).await?))
}

/// Delete a category (ADMIN); its children become roots
#[utoipa::path(
    delete,
    path = "/api/category/{slug}",
    tag = "category",
    params(("slug" = String, Path, description = "Category slug")),
    responses(
        (status = 200, description = "Category deleted"),
        (status = 403, description = "ADMIN role required", body = crate::error::ErrorEnvelope),
        (status = 404, description = "Unknown slug", body = crate::error::ErrorEnvelope),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_category_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.catalog.delete(&slug).await?))
}
