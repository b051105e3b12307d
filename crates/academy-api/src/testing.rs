//! In-process test harness: the full router over a memory store, a
//! recording mailer and a manually advanced clock.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use crate::auth::models::Role;
use crate::auth::repository::UserDirectory;
use crate::clock::ManualClock;
use crate::mail::RecordingMailer;
use crate::routes::create_router;
use crate::state::AppState;
use crate::store::{MemoryStore, Stores};

pub const TEST_PASSWORD: &str = "Abcd123!";

pub struct TestHarness {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub clock: Arc<ManualClock>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let clock = Arc::new(ManualClock::default());
        let state = Arc::new(AppState::for_testing(
            Stores::from_backend(store.clone()),
            mailer.clone(),
            clock.clone(),
        ));

        Self {
            router: create_router(state.clone()),
            state,
            store,
            mailer,
            clock,
        }
    }

    /// Send one request; the body is parsed as JSON, `Null` when empty.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request builds"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, bearer).await
    }

    pub async fn post(&self, uri: &str, body: Value, bearer: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body), bearer).await
    }

    /// Raw checkout token from the latest mail sent to `email`
    pub fn mailed_token(&self, email: &str) -> String {
        let mail = self
            .mailer
            .sent_to(email)
            .pop()
            .expect("a mail was sent to this address");
        let start = mail.text.find("token=").expect("mail carries a token link") + "token=".len();
        mail.text[start..]
            .split_whitespace()
            .next()
            .expect("token follows the marker")
            .to_string()
    }

    pub async fn register(&self, email: &str, username: &str) -> (StatusCode, Value) {
        self.post(
            "/api/auth/register",
            serde_json::json!({
                "email": email,
                "username": username,
                "password": TEST_PASSWORD,
            }),
            None,
        )
        .await
    }

    /// Register and verify; returns the session token.
    pub async fn verified_account(&self, email: &str, username: &str) -> String {
        let (status, _) = self.register(email, username).await;
        assert_eq!(status, StatusCode::CREATED);
        let token = self.mailed_token(email);
        let (status, body) = self
            .get(&format!("/api/auth/verify-email?token={token}"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["token"]
            .as_str()
            .expect("session token in response")
            .to_string()
    }

    /// A verified account promoted to ADMIN; returns its session token.
    pub async fn admin_account(&self, email: &str, username: &str) -> String {
        let token = self.verified_account(email, username).await;
        let account = self
            .store
            .find_by_email(email)
            .await
            .expect("store reachable")
            .expect("account exists");
        self.store
            .update_role(account.id, Role::Admin)
            .await
            .expect("role updated");
        token
    }
}
