//! Role policy
//!
//! Public routes never pass through here. Admin routes are wrapped with
//! [`require_role`], which runs after the authentication gate has attached
//! a [`SecurityContext`].

use std::future::Future;
use std::pin::Pin;

use axum::{body::Body, extract::Request, middleware::Next, response::Response};

use super::middleware::SecurityContext;
use super::models::{Account, Role};
use crate::audit::{audit_log, AuditEvent, RequestMeta};
use crate::error::AppError;

/// Check that `ctx` carries an account holding `required`.
pub fn authorize(ctx: &SecurityContext, required: Role) -> Result<&Account, AppError> {
    let account = ctx.require_account()?;
    if account.role != required {
        return Err(AppError::Forbidden(format!(
            "{} role required",
            required.as_str()
        )));
    }
    Ok(account)
}

type RoleMiddlewareFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory rejecting callers that lack `required`
///
/// # Example
///
/// ```ignore
/// let admin = Router::new()
///     .route("/api/category", post(create_category))
///     .route_layer(middleware::from_fn(require_role(Role::Admin)));
/// ```
pub fn require_role(
    required: Role,
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let ctx = request
                .extensions()
                .get::<SecurityContext>()
                .cloned()
                .unwrap_or_default();

            if let Err(e) = authorize(&ctx, required) {
                audit_log(
                    &AuditEvent::AccessDenied {
                        user_id: ctx.account.as_ref().map(|a| a.uuid),
                        email: ctx.account.as_ref().map(|a| a.email.clone()),
                        resource: request.uri().path().to_string(),
                        required_role: required.to_string(),
                    },
                    &RequestMeta::from_headers(request.headers()),
                );
                return Err(e);
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use chrono::Utc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn account(role: Role) -> Account {
        Account {
            id: 1,
            uuid: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            password_hash: None,
            verified: true,
            enabled: true,
            role,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ctx(role: Option<Role>) -> SecurityContext {
        SecurityContext {
            account: role.map(account),
            token: role.map(|_| "token".to_string()),
        }
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(&ctx(Some(Role::Admin)), Role::Admin).is_ok());
        assert!(matches!(
            authorize(&ctx(Some(Role::Client)), Role::Admin),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            authorize(&ctx(None), Role::Admin),
            Err(AppError::NoAuthenticatedUser)
        ));
    }

    async fn status_for(context: Option<SecurityContext>) -> StatusCode {
        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(require_role(Role::Admin)));

        let mut request = Request::builder().uri("/admin").body(Body::empty()).unwrap();
        if let Some(context) = context {
            request.extensions_mut().insert(context);
        }
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_require_role_middleware() {
        assert_eq!(status_for(Some(ctx(Some(Role::Admin)))).await, StatusCode::OK);
        assert_eq!(
            status_for(Some(ctx(Some(Role::Client)))).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(Some(ctx(None))).await,
            StatusCode::UNAUTHORIZED
        );
        // No gate in front at all
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
    }
}
