//! API route definitions

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::auth::{authentication_gate, require_role, Role};
use crate::handlers::{auth, categories, health, users};
use crate::middleware::security_headers_middleware;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Routes nested under `/api`
pub fn api_routes() -> Router<Arc<AppState>> {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/verify-email", get(auth::verify_email_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/forgot-password", post(auth::forgot_password_handler))
        .route("/auth/reset-password", post(auth::reset_password_handler))
        .route("/auth/resend-verification", post(auth::resend_handler))
        .route("/category", get(categories::list_categories_handler))
        .route("/category/:slug", get(categories::get_category_handler));

    // Anonymous callers reach the handler, which answers NO_AUTH_USER.
    let account_routes = Router::new().route("/user", put(users::update_username_handler));

    let admin_routes = Router::new()
        .route("/category", post(categories::create_category_handler))
        .route("/category/:slug", delete(categories::delete_category_handler))
        .route_layer(middleware::from_fn(require_role(Role::Admin)));

    Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(admin_routes)
}

/// Full application: health, OpenAPI document and `/api`, behind the gate
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api", api_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_gate,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// `*` allows any origin; an empty list sends no CORS headers at all.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(parsed))
}
