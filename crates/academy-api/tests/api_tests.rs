//! API integration tests
//!
//! Drive the full router in-process over the memory store. The Postgres
//! store has its own `#[ignore]`d tests that need a database.

use academy_api::auth::models::TokenPurpose;
use academy_api::auth::repository::{CheckoutTokenStore, UserDirectory};
use academy_api::create_router_for_testing;
use academy_api::testing::{TestHarness, TEST_PASSWORD};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Duration;
use futures::future::join_all;
use serde_json::{json, Value};
use tower::ServiceExt;

fn assert_error(status: StatusCode, body: &Value, expected_status: StatusCode, code: &str) {
    assert_eq!(status, expected_status, "unexpected body: {body}");
    assert_eq!(body["status"], "ERROR");
    assert_eq!(body["errorCode"], code, "unexpected body: {body}");
    assert!(body["timestamp"].is_string());
}

// =============================================================================
// Health and envelope
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// =============================================================================
// Registration and verification
// =============================================================================

#[tokio::test]
async fn test_register_returns_created_unverified_view() {
    let h = TestHarness::new();

    let (status, body) = h.register("a@x.com", "alice").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "SUCCESS");
    let user = &body["data"];
    assert_eq!(user["email"], "a@x.com");
    assert_eq!(user["username"], "alice");
    assert_eq!(user["role"], "CLIENT");
    assert_eq!(user["verified"], false);
    assert!(user["createdAt"].is_string());
    assert!(user.get("password").is_none());
    assert!(user.get("passwordHash").is_none());

    assert_eq!(h.mailer.sent_to("a@x.com").len(), 1);
}

#[tokio::test]
async fn test_register_duplicates_conflict() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;

    let (status, body) = h.register("A@X.com", "someone").await;
    assert_error(status, &body, StatusCode::CONFLICT, "EMAIL_ALREADY_EXISTS");

    let (status, body) = h.register("b@x.com", "alice").await;
    assert_error(status, &body, StatusCode::CONFLICT, "USERNAME_ALREADY_EXISTS");
}

#[tokio::test]
async fn test_register_mail_failure_allows_retry() {
    let h = TestHarness::new();
    h.mailer.set_failing(true);

    let (status, body) = h.register("a@x.com", "alice").await;
    assert_error(status, &body, StatusCode::INTERNAL_SERVER_ERROR, "MAIL_ERROR");

    h.mailer.set_failing(false);
    let (status, body) = h.register("a@x.com", "alice").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let token = h.mailed_token("a@x.com");
    let (status, _) = h
        .get(&format!("/api/auth/verify-email?token={token}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_validation_errors() {
    let h = TestHarness::new();

    let (status, body) = h
        .post(
            "/api/auth/register",
            json!({"email": "not-an-email", "username": "alice", "password": "weak"}),
            None,
        )
        .await;

    assert_error(status, &body, StatusCode::BAD_REQUEST, "VALIDATION_ERROR");
    let description = body["description"].as_str().unwrap();
    assert!(description.contains("[email]"), "{description}");
    assert!(description.contains("[password]"), "{description}");
    assert!(!description.contains("[username]"), "{description}");
}

#[tokio::test]
async fn test_register_malformed_body() {
    let h = TestHarness::new();
    let (status, body) = h
        .post("/api/auth/register", json!({"email": "a@x.com"}), None)
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "BAD_REQUEST");
}

#[tokio::test]
async fn test_full_account_scenario() {
    let h = TestHarness::new();

    let (status, registered) = h.register("a@x.com", "alice").await;
    assert_eq!(status, StatusCode::CREATED);
    let account_id = registered["data"]["id"].clone();

    let token = h.mailed_token("a@x.com");
    let (status, verified) = h
        .get(&format!("/api/auth/verify-email?token={token}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["data"]["user"]["verified"], true);
    assert!(verified["data"]["token"].is_string());

    // Replaying the same verification token
    let (status, body) = h
        .get(&format!("/api/auth/verify-email?token={token}"), None)
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "TOKEN_ALREADY_USED");

    let (status, login) = h
        .post(
            "/api/auth/login",
            json!({"email": "a@x.com", "password": TEST_PASSWORD}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let session = login["data"]["token"].as_str().unwrap().to_string();

    let (status, me) = h.get("/api/auth/me", Some(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["user"]["id"], account_id);
    assert_eq!(me["data"]["token"], session.as_str());
}

#[tokio::test]
async fn test_verify_on_already_verified_account() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;

    let account = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
    let extra = h
        .state
        .checkout_tokens()
        .create(
            account.id,
            TokenPurpose::EmailVerification,
            15,
            "second-verification-token".to_string(),
        )
        .await
        .unwrap();

    let (status, body) = h
        .get(&format!("/api/auth/verify-email?token={}", extra.token), None)
        .await;
    assert_error(status, &body, StatusCode::CONFLICT, "USER_ALREADY_VERIFIED");
}

#[tokio::test]
async fn test_verify_unknown_and_missing_token() {
    let h = TestHarness::new();

    let (status, body) = h.get("/api/auth/verify-email?token=nope", None).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "TOKEN_INVALID");

    let (status, body) = h.get("/api/auth/verify-email", None).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "BAD_REQUEST");
}

#[tokio::test]
async fn test_verification_token_expires() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;
    let token = h.mailed_token("a@x.com");

    h.clock.advance(Duration::minutes(15));

    let (status, body) = h
        .get(&format!("/api/auth/verify-email?token={token}"), None)
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_concurrent_verification_has_one_winner() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;
    let token = h.mailed_token("a@x.com");
    let uri = format!("/api/auth/verify-email?token={token}");

    let attempts = (0..6).map(|_| {
        let router = h.router.clone();
        let uri = uri.clone();
        tokio::spawn(async move {
            router
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        })
    });

    let mut ok = 0;
    for status in join_all(attempts).await {
        let status = status.unwrap();
        if status == StatusCode::OK {
            ok += 1;
        } else {
            assert!(
                status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT,
                "unexpected status {status}"
            );
        }
    }
    assert_eq!(ok, 1);
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_unverified_login_rejected_before_password_check() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;

    for password in [TEST_PASSWORD, "Wrong123!"] {
        let (status, body) = h
            .post(
                "/api/auth/login",
                json!({"email": "a@x.com", "password": password}),
                None,
            )
            .await;
        assert_error(status, &body, StatusCode::FORBIDDEN, "ACCOUNT_NOT_VERIFIED");
    }
}

#[tokio::test]
async fn test_login_failures_look_alike() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;

    let (s1, wrong_password) = h
        .post(
            "/api/auth/login",
            json!({"email": "a@x.com", "password": "Wrong123!"}),
            None,
        )
        .await;
    let (s2, unknown_user) = h
        .post(
            "/api/auth/login",
            json!({"username": "nobody", "password": TEST_PASSWORD}),
            None,
        )
        .await;

    assert_error(s1, &wrong_password, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS");
    assert_error(s2, &unknown_user, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS");
    assert_eq!(wrong_password["description"], unknown_user["description"]);
}

#[tokio::test]
async fn test_login_by_username() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;

    let (status, body) = h
        .post(
            "/api/auth/login",
            json!({"username": "alice", "password": TEST_PASSWORD}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "a@x.com");
}

// =============================================================================
// Gate and /me
// =============================================================================

#[tokio::test]
async fn test_me_without_header() {
    let h = TestHarness::new();
    let (status, body) = h.get("/api/auth/me", None).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "MISSING_TOKEN");
}

#[tokio::test]
async fn test_me_with_garbage_token() {
    let h = TestHarness::new();
    let (status, body) = h.get("/api/auth/me", Some("garbage")).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "TOKEN_INVALID");
}

#[tokio::test]
async fn test_me_with_token_for_unknown_account() {
    let h = TestHarness::new();
    let token = h
        .state
        .codec
        .issue("ghost@x.com", serde_json::Map::new(), None)
        .unwrap();

    let (status, body) = h.get("/api/auth/me", Some(&token)).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "NO_AUTH_USER");
}

#[tokio::test]
async fn test_session_tokens_do_not_expire() {
    let h = TestHarness::new();
    let session = h.verified_account("a@x.com", "alice").await;

    h.clock.advance(Duration::days(365));

    let (status, _) = h.get("/api/auth/me", Some(&session)).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Password reset and resend
// =============================================================================

#[tokio::test]
async fn test_password_reset_flow() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;

    let (status, body) = h
        .post("/api/auth/forgot-password", json!({"email": "a@x.com"}), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_string());

    let reset = h.mailed_token("a@x.com");
    let (status, _) = h
        .post(
            "/api/auth/reset-password",
            json!({"token": reset, "newPassword": "NewPass9$"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .post(
            "/api/auth/login",
            json!({"email": "a@x.com", "password": "NewPass9$"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reset_with_expired_token() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;
    h.post("/api/auth/forgot-password", json!({"email": "a@x.com"}), None)
        .await;
    let reset = h.mailed_token("a@x.com");

    h.clock.advance(Duration::minutes(16));

    let (status, body) = h
        .post(
            "/api/auth/reset-password",
            json!({"token": reset, "newPassword": "NewPass9$"}),
            None,
        )
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_reset_rejects_weak_password() {
    let h = TestHarness::new();
    let (status, body) = h
        .post(
            "/api/auth/reset-password",
            json!({"token": "whatever", "newPassword": "short"}),
            None,
        )
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "VALIDATION_ERROR");
    assert!(body["description"]
        .as_str()
        .unwrap()
        .contains("password"));
}

#[tokio::test]
async fn test_forgot_password_unknown_email() {
    let h = TestHarness::new();
    let (status, body) = h
        .post("/api/auth/forgot-password", json!({"email": "ghost@x.com"}), None)
        .await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS");
    assert_eq!(h.mailer.count(), 0);
}

#[tokio::test]
async fn test_resend_for_verified_account_produces_nothing() {
    let h = TestHarness::new();
    h.verified_account("a@x.com", "alice").await;
    let account = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
    let mails_before = h.mailer.count();
    let tokens_before = h.store.checkouts_for(account.id).len();

    let (status, body) = h
        .post(
            "/api/auth/resend-verification",
            json!({"email": "a@x.com", "purpose": "EMAIL_VERIFICATION"}),
            None,
        )
        .await;

    assert_error(status, &body, StatusCode::CONFLICT, "USER_ALREADY_VERIFIED");
    assert_eq!(h.mailer.count(), mails_before);
    assert_eq!(h.store.checkouts_for(account.id).len(), tokens_before);
}

#[tokio::test]
async fn test_resend_accepts_type_alias_and_invalidates_old_token() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;
    let first = h.mailed_token("a@x.com");

    h.clock.advance(Duration::seconds(1));
    let (status, _) = h
        .post(
            "/api/auth/resend-verification",
            json!({"email": "a@x.com", "type": "EMAIL_VERIFICATION"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.store.find_by_token(&first).await.unwrap().unwrap();
    assert!(stored.used);

    let second = h.mailed_token("a@x.com");
    let (status, _) = h
        .get(&format!("/api/auth/verify-email?token={second}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_resend_unsupported_purpose() {
    let h = TestHarness::new();
    h.register("a@x.com", "alice").await;

    let (status, body) = h
        .post(
            "/api/auth/resend-verification",
            json!({"email": "a@x.com", "purpose": "AUTH"}),
            None,
        )
        .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "BAD_REQUEST");
}

// =============================================================================
// Username
// =============================================================================

#[tokio::test]
async fn test_change_username() {
    let h = TestHarness::new();
    let alice = h.verified_account("a@x.com", "alice").await;
    h.register("b@x.com", "bob").await;

    let (status, body) = h
        .send(Method::PUT, "/api/user", Some(json!({"username": "Bob"})), Some(&alice))
        .await;
    assert_error(status, &body, StatusCode::CONFLICT, "USERNAME_ALREADY_EXISTS");

    let (status, body) = h
        .send(Method::PUT, "/api/user", Some(json!({"username": "alicia"})), Some(&alice))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alicia");

    let (status, body) = h
        .send(Method::PUT, "/api/user", Some(json!({"username": "x"})), None)
        .await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "NO_AUTH_USER");
}

// =============================================================================
// Category catalog and role policy
// =============================================================================

#[tokio::test]
async fn test_category_mutation_requires_admin() {
    let h = TestHarness::new();
    let client = h.verified_account("c@x.com", "carol").await;
    let admin = h.admin_account("root@x.com", "root").await;
    let payload = json!({"name": "Rust Basics", "description": "Ownership and borrowing"});

    let (status, body) = h.post("/api/category", payload.clone(), None).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "NO_AUTH_USER");

    let (status, body) = h.post("/api/category", payload.clone(), Some(&client)).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, "FORBIDDEN");

    let (status, body) = h.post("/api/category", payload.clone(), Some(&admin)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["slug"], "rust-basics");

    let (status, body) = h.post("/api/category", payload, Some(&admin)).await;
    assert_error(status, &body, StatusCode::CONFLICT, "CATEGORY_ALREADY_EXISTS");
}

#[tokio::test]
async fn test_category_reads_are_public() {
    let h = TestHarness::new();
    let admin = h.admin_account("root@x.com", "root").await;

    let (_, parent) = h
        .post(
            "/api/category",
            json!({"name": "Programming", "description": "All languages"}),
            Some(&admin),
        )
        .await;
    let parent_id = parent["data"]["id"].clone();
    h.post(
        "/api/category",
        json!({"name": "Rust", "description": "Systems", "parentId": parent_id}),
        Some(&admin),
    )
    .await;

    let (status, list) = h.get("/api/category", None).await;
    assert_eq!(status, StatusCode::OK);
    let roots = list["data"].as_array().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["children"][0]["slug"], "rust");

    let (status, single) = h.get("/api/category/rust", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["data"]["parent"]["slug"], "programming");

    let (status, body) = h.get("/api/category/missing", None).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, "NOT_FOUND");
}

#[tokio::test]
async fn test_category_delete() {
    let h = TestHarness::new();
    let admin = h.admin_account("root@x.com", "root").await;
    let client = h.verified_account("c@x.com", "carol").await;
    h.post(
        "/api/category",
        json!({"name": "Go", "description": "Gophers"}),
        Some(&admin),
    )
    .await;

    let (status, _) = h
        .send(Method::DELETE, "/api/category/go", None, Some(&client))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send(Method::DELETE, "/api/category/go", None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .send(Method::DELETE, "/api/category/go", None, Some(&admin))
        .await;
    assert_error(status, &body, StatusCode::NOT_FOUND, "NOT_FOUND");
}
