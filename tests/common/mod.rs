#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use urban_lens::analytics::{FetchError, FetchedImage, ImageSource, TrafficPipeline};
use urban_lens::auth::TokenService;
use urban_lens::config::{Config, DatabaseConfig};
use urban_lens::db::Database;
use urban_lens::llm::{AnalysisQueue, LlmProvider, VisionClient};
use urban_lens::server::{build_router, AppState};

pub const PASSWORD: &str = "Str0ng!pass";
pub const VISION_REPLY: &str = "count: 3 cars";

/// Serves the same tiny JPEG for every reference.
pub struct FixedImage;

impl ImageSource for FixedImage {
    fn fetch(&self, _reference: &str) -> Result<FetchedImage, FetchError> {
        Ok(FetchedImage {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg",
        })
    }
}

pub struct CannedVision;

impl LlmProvider for CannedVision {
    fn analyze_image(&self, _image: &[u8], _mime: &str, _prompt: &str) -> anyhow::Result<String> {
        Ok(VISION_REPLY.to_string())
    }

    fn provider_name(&self) -> &'static str {
        "canned"
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database = DatabaseConfig {
            path: dir.path().join("test.db"),
            pool_size: 4,
        };
        config.auth.jwt_secret = "test-secret".to_string();

        let db = Database::open(&config.database).unwrap();
        db.initialize().unwrap();

        let pipeline = TrafficPipeline::new(
            db.clone(),
            Arc::new(FixedImage),
            VisionClient::with_provider(Arc::new(CannedVision)),
        );
        let (queue, _worker) = AnalysisQueue::start(Arc::new(pipeline));
        let tokens =
            TokenService::new("test-secret", "HS256", Duration::minutes(30)).unwrap();

        let state = AppState {
            db: db.clone(),
            queue,
            tokens,
            config: Arc::new(config),
        };
        let router = build_router(state).unwrap();

        Self {
            router,
            db,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, token, body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::PUT, uri, token, Some(body))).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::DELETE, uri, token, None)).await
    }

    /// Register `email` and return `(user_id, access_token)`.
    pub async fn register_and_login(&self, email: &str) -> (String, String) {
        let (status, user) = self
            .post(
                "/api/v1/users",
                None,
                Some(serde_json::json!({
                    "email": email,
                    "password": PASSWORD,
                    "first_name": "Test",
                    "last_name": "User",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {user}");

        let (status, token) = self
            .post(
                "/api/v1/auth/login",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {token}");

        (
            user["id"].as_str().unwrap().to_string(),
            token["access_token"].as_str().unwrap().to_string(),
        )
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
