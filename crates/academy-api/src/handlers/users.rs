//! Account self-service handlers

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};

use crate::audit::RequestMeta;
use crate::auth::{SecurityContext, UpdateUsernameRequest};
use crate::error::{ok, AppError};
use crate::extract::ValidatedJson;
use crate::state::AppState;

/// Change the authenticated account's username
#[utoipa::path(
    put,
    path = "/api/user",
    tag = "user",
    request_body = UpdateUsernameRequest,
    responses(
        (status = 200, description = "Username changed", body = crate::auth::UserView),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Username already in use", body = crate::error::ErrorEnvelope),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_username_handler(
    State(state): State<Arc<AppState>>,
    ctx: SecurityContext,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<UpdateUsernameRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.accounts.change_username(&ctx, request, &meta).await?;
    Ok(ok(view))
}
