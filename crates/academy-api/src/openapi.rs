//! OpenAPI document served at `/api-docs/openapi.json`

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::models::{AuthResponse, Role, TokenPurpose, UserView};
use crate::auth::service::{
    ForgotPasswordRequest, LoginRequest, RegisterRequest, ResendRequest, ResetPasswordRequest,
    UpdateUsernameRequest,
};
use crate::catalog::service::CreateCategoryRequest;
use crate::catalog::{CategoryRef, CategoryView};
use crate::error::ErrorEnvelope;
use crate::handlers::health::HealthResponse;

#[derive(OpenApi)]
#[openapi(
    info(title = "OpenAcademy API", description = "Accounts, sessions and the course catalog"),
    paths(
        crate::handlers::auth::register_handler,
        crate::handlers::auth::login_handler,
        crate::handlers::auth::verify_email_handler,
        crate::handlers::auth::me_handler,
        crate::handlers::auth::forgot_password_handler,
        crate::handlers::auth::reset_password_handler,
        crate::handlers::auth::resend_handler,
        crate::handlers::users::update_username_handler,
        crate::handlers::categories::list_categories_handler,
        crate::handlers::categories::get_category_handler,
        crate::handlers::categories::create_category_handler,
        crate::handlers::categories::delete_category_handler,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        RegisterRequest,
        LoginRequest,
        ForgotPasswordRequest,
        ResetPasswordRequest,
        ResendRequest,
        UpdateUsernameRequest,
        UserView,
        AuthResponse,
        Role,
        TokenPurpose,
        CreateCategoryRequest,
        CategoryView,
        CategoryRef,
        ErrorEnvelope,
        HealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration, login and checkout tokens"),
        (name = "user", description = "Account self-service"),
        (name = "category", description = "Course catalog"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
