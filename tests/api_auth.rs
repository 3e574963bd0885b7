mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;

use common::{TestApp, PASSWORD};
use urban_lens::auth::{generate_reset_token, hash_reset_token};

#[tokio::test]
async fn test_login_token_identifies_registered_user() {
    let app = TestApp::new();
    let (user_id, token) = app.register_and_login("alice@example.com").await;

    let (status, me) = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.as_str());
    assert_eq!(me["email"], "alice@example.com");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn test_wrong_password_is_rejected_without_token() {
    let app = TestApp::new();
    app.register_and_login("bob@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(common::request(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "bob@example.com", "password": "Wr0ng!pass" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "bob@example.com", "password": "Wr0ng!pass" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("access_token").is_none());
    assert_eq!(body["detail"], "Incorrect email or password");
}

#[tokio::test]
async fn test_form_login_uses_username_field() {
    let app = TestApp::new();
    let (user_id, _) = app.register_and_login("carol@example.com").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login/form")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=Carol%40example.com&password=Str0ng%21pass"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");

    let token = body["access_token"].as_str().unwrap();
    let (_, me) = app.get("/api/v1/auth/me", Some(token)).await;
    assert_eq!(me["id"], user_id.as_str());
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Could not validate credentials");

    let (status, _) = app.get("/api/v1/auth/me", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_registration_validation() {
    let app = TestApp::new();
    app.register_and_login("dave@example.com").await;

    let (status, body) = app
        .post(
            "/api/v1/users",
            None,
            Some(json!({
                "email": "DAVE@example.com",
                "password": PASSWORD,
                "first_name": "D",
                "last_name": "Dup",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email already registered");

    let (status, _) = app
        .post(
            "/api/v1/users",
            None,
            Some(json!({
                "email": "erin@example.com",
                "password": "weak",
                "first_name": "E",
                "last_name": "Weak",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post("/api/v1/users", None, Some(json!({ "email": "x@example.com" })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_inactive_user_cannot_log_in() {
    let app = TestApp::new();
    let (user_id, token) = app.register_and_login("frank@example.com").await;
    app.db.set_user_active(&user_id, false).unwrap();

    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "frank@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Inactive user");

    let (status, _) = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let app = TestApp::new();
    app.register_and_login("gina@example.com").await;

    let (known, _) = app
        .post(
            "/api/v1/auth/forgot-password",
            None,
            Some(json!({ "email": "gina@example.com" })),
        )
        .await;
    let (unknown, _) = app
        .post(
            "/api/v1/auth/forgot-password",
            None,
            Some(json!({ "email": "nobody@example.com" })),
        )
        .await;
    assert_eq!(known, StatusCode::ACCEPTED);
    assert_eq!(unknown, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_reset_token_is_single_use() {
    let app = TestApp::new();
    let (user_id, _) = app.register_and_login("hank@example.com").await;

    let token = generate_reset_token();
    app.db
        .create_password_reset(&user_id, &hash_reset_token(&token), Utc::now() + Duration::hours(1))
        .unwrap();

    let reset = json!({ "token": token, "new_password": "N3w!password" });
    let (status, _) = app
        .post("/api/v1/auth/reset-password", None, Some(reset.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "hank@example.com", "password": "N3w!password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/auth/reset-password", None, Some(reset))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_requires_current_password() {
    let app = TestApp::new();
    let (_, token) = app.register_and_login("ivan@example.com").await;

    let (status, body) = app
        .post(
            "/api/v1/auth/change-password",
            Some(&token),
            Some(json!({ "current_password": "Wr0ng!pass", "new_password": "N3w!password" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Incorrect password");

    let (status, _) = app
        .post(
            "/api/v1/auth/change-password",
            Some(&token),
            Some(json!({ "current_password": PASSWORD, "new_password": "N3w!password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "ivan@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
