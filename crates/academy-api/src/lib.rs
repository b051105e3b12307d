//! OpenAcademy API
//!
//! Account registration and email verification, session tokens, password
//! reset, and the admin-guarded course catalog, served over axum.

pub mod audit;
pub mod auth;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mail;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use routes::{api_routes, create_router};

/// Router over a fresh in-memory backend
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> axum::Router {
    testing::TestHarness::new().router
}
