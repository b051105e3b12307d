//! Authentication API handlers
//!
//! Thin adapters: extract and validate the request, call
//! [`AccountLifecycleService`](crate::auth::AccountLifecycleService), wrap
//! the result in the success envelope.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};

use crate::audit::RequestMeta;
use crate::auth::{
    ForgotPasswordRequest, LoginRequest, RegisterRequest, ResendRequest, ResetPasswordRequest,
    SecurityContext, VerifyEmailQuery,
};
use crate::error::{created, ok, AppError};
use crate::extract::{ValidatedJson, ValidatedQuery};
use crate::state::AppState;

/// Register a new account
///
/// The account starts unverified with the CLIENT role. A verification link
/// valid for the configured checkout lifetime is mailed to the address.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = crate::auth::UserView),
        (status = 400, description = "Invalid input", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Email or username already in use", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Verification mail could not be sent", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.accounts.register(request, &meta).await?;
    Ok(created(view))
}

/// Login with email or username
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = crate::auth::AuthResponse),
        (status = 400, description = "Neither or both of email and username given", body = crate::error::ErrorEnvelope),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorEnvelope),
        (status = 403, description = "Account not verified", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.accounts.login(request, &meta).await?;
    Ok(ok(response))
}

/// Redeem an email verification token
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    tag = "auth",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified, session started", body = crate::auth::AuthResponse),
        (status = 400, description = "Token expired, invalid or already used", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Account already verified", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn verify_email_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedQuery(query): ValidatedQuery<VerifyEmailQuery>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.accounts.verify_email(&query.token, &meta).await?;
    Ok(ok(response))
}

/// Current account and the token that identified it
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current account", body = crate::auth::AuthResponse),
        (status = 401, description = "No bearer token, or no account for it", body = crate::error::ErrorEnvelope),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    ctx: SecurityContext,
) -> Result<impl IntoResponse, AppError> {
    let response = state.accounts.current_user(&ctx)?;
    Ok(ok(response))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent"),
        (status = 401, description = "No account for this email", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state
        .accounts
        .request_password_reset(&request.email, &meta)
        .await?;
    Ok(ok(message))
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Token expired, invalid or already used", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state
        .accounts
        .confirm_password_reset(&request.token, request.new_password, &meta)
        .await?;
    Ok(ok(message))
}

/// Resend a verification or password reset mail
///
/// Any still-active token of the same purpose stops working.
#[utoipa::path(
    post,
    path = "/api/auth/resend-verification",
    tag = "auth",
    request_body = ResendRequest,
    responses(
        (status = 200, description = "Mail sent"),
        (status = 400, description = "Unsupported purpose", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Account already verified", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn resend_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    ValidatedJson(request): ValidatedJson<ResendRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.accounts.resend(request, &meta).await?;
    Ok(ok(message))
}
