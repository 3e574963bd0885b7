mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

async fn create_location(app: &TestApp, token: &str, address: &str) -> String {
    let (status, body) = app
        .post(
            "/api/v1/locations",
            Some(token),
            Some(json!({
                "address": address,
                "latitude": 52.2297,
                "longitude": 21.0122,
                "tags": ["retail", "corner"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_foreign_delete_is_forbidden_and_location_survives() {
    let app = TestApp::new();
    let (_, owner) = app.register_and_login("owner@example.com").await;
    let (_, intruder) = app.register_and_login("intruder@example.com").await;
    let id = create_location(&app, &owner, "1 Market Street").await;

    let (status, body) = app
        .delete(&format!("/api/v1/locations/{id}"), Some(&intruder))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Not enough permissions");

    let (status, body) = app
        .get(&format!("/api/v1/locations/{id}"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "1 Market Street");
}

#[tokio::test]
async fn test_listing_by_user_is_self_only() {
    let app = TestApp::new();
    let (owner_id, owner) = app.register_and_login("lister@example.com").await;
    let (_, other) = app.register_and_login("snoop@example.com").await;
    let id = create_location(&app, &owner, "7 Mill Road").await;

    let (status, body) = app.get("/api/v1/locations/me", Some(&owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], id.as_str());

    let (status, body) = app
        .get(&format!("/api/v1/locations/user/{owner_id}"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = app
        .get(&format!("/api/v1/locations/user/{owner_id}"), Some(&other))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Not enough permissions");

    let (status, body) = app.get("/api/v1/locations/me", Some(&other)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = app.get("/api/v1/locations/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_location_crud_for_owner() {
    let app = TestApp::new();
    let (user_id, token) = app.register_and_login("crud@example.com").await;
    let id = create_location(&app, &token, "10 High Street").await;

    let (status, body) = app.get("/api/v1/locations", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["user_id"], user_id.as_str());
    assert_eq!(list[0]["tags"], json!(["retail", "corner"]));

    let (status, body) = app
        .put(
            &format!("/api/v1/locations/{id}"),
            Some(&token),
            json!({ "description": "Busy junction" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "Busy junction");
    assert_eq!(body["address"], "10 High Street");

    let (status, _) = app
        .delete(&format!("/api/v1/locations/{id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .get(&format!("/api/v1/locations/{id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_location_validation_and_auth() {
    let app = TestApp::new();
    let (_, token) = app.register_and_login("geo@example.com").await;

    let (status, _) = app
        .post(
            "/api/v1/locations",
            Some(&token),
            Some(json!({ "address": "Nowhere", "latitude": 123.0, "longitude": 0.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post(
            "/api/v1/locations",
            None,
            Some(json!({ "address": "Nowhere", "latitude": 1.0, "longitude": 0.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_users_may_only_modify_themselves() {
    let app = TestApp::new();
    let (alice_id, alice) = app.register_and_login("alice@example.com").await;
    let (bob_id, bob) = app.register_and_login("bob@example.com").await;

    let (status, _) = app
        .put(
            &format!("/api/v1/users/{alice_id}"),
            Some(&bob),
            json!({ "first_name": "Mallory" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .delete(&format!("/api/v1/users/{alice_id}"), Some(&bob))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &format!("/api/v1/users/{alice_id}"),
            Some(&alice),
            json!({ "first_name": "Alicia" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["first_name"], "Alicia");

    let (status, body) = app
        .put(
            &format!("/api/v1/users/{alice_id}"),
            Some(&alice),
            json!({ "email": "bob@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email already registered");

    let (status, body) = app
        .get(&format!("/api/v1/users/{bob_id}"), Some(&alice))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "bob@example.com");

    let (status, _) = app
        .delete(&format!("/api/v1/users/{bob_id}"), Some(&bob))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get("/api/v1/auth/me", Some(&bob)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
