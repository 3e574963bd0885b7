//! HTTP API.

pub mod analytics;
pub mod auth;
pub mod error;
pub mod extract;
pub mod locations;
pub mod users;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::auth::TokenService;
use crate::config::Config;
use crate::db::Database;
use crate::llm::AnalysisQueue;

const PROCESS_TIME_HEADER: &str = "x-process-time";
const SLOW_REQUEST: Duration = Duration::from_millis(500);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub queue: AnalysisQueue,
    pub tokens: TokenService,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS origin `{origin}`")]
    CorsOrigin { origin: String },
    #[error("server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Run blocking storage work off the async executor.
pub async fn run_blocking<F, T>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(e)),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    api_prefix: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Build the full application router with middleware.
pub fn build_router(state: AppState) -> Result<Router, ServerError> {
    let api_prefix = normalize_prefix(&state.config.server.api_prefix);
    let cors = build_cors_layer(&state.config.cors_origins())?;

    let api = Router::new()
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/locations", locations::router())
        .nest("/analytics", analytics::router());

    let root = {
        let api_prefix = api_prefix.clone();
        move || async move {
            Json(RootResponse {
                name: "Urban Lens API",
                version: env!("CARGO_PKG_VERSION"),
                api_prefix,
            })
        }
    };

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest(&api_prefix, api)
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/api".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    let methods = AllowMethods::list([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]);

    // Browsers refuse credentials with a wildcard origin.
    if origins.iter().any(|origin| origin.trim() == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(AllowHeaders::mirror_request()));
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| ServerError::CorsOrigin {
                origin: origin.clone(),
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

/// Log each request with a short id and report the handling time.
async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    tracing::info!(%request_id, %method, %path, "Request started");
    let mut response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();

    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", elapsed.as_secs_f64())) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(PROCESS_TIME_HEADER), value);
    }

    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed > SLOW_REQUEST {
        tracing::warn!(%request_id, %method, %path, status, elapsed_ms, "Slow request");
    } else {
        tracing::info!(%request_id, %method, %path, status, elapsed_ms, "Request completed");
    }
    response
}

/// Bind and serve until Ctrl+C or SIGTERM, then drain for a bounded time.
pub async fn serve(state: AppState) -> Result<(), ServerError> {
    let address = state.config.server.listen_addr.trim().to_string();
    let addr: SocketAddr = address
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: address.clone(),
            source,
        })?;

    let app = build_router(state)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(%local_addr, "Urban Lens API listening");
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(broadcast_shutdown(shutdown_tx));
    let mut server = Box::pin(async move { server.await });

    let drain = async move {
        if shutdown_rx.changed().await.is_ok() {
            tracing::info!("Shutdown signal received, draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(seconds = DRAIN_TIMEOUT.as_secs(), "Graceful shutdown timed out");
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server.as_mut() => result.map_err(|source| ServerError::Serve { source })?,
        _ = drain => {}
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn broadcast_shutdown(sender: watch::Sender<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        shutdown_signal().await;
        let _ = sender.send(true);
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/api/v1"), "/api/v1");
        assert_eq!(normalize_prefix("api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix(""), "/api");
    }

    #[test]
    fn test_invalid_cors_origin_is_rejected() {
        let err = build_cors_layer(&["http://ok.example".to_string(), "bad\norigin".to_string()])
            .unwrap_err();
        assert!(matches!(err, ServerError::CorsOrigin { .. }));
    }

    #[tokio::test]
    async fn test_wildcard_cors_origin_allows_any_origin() {
        use tower::ServiceExt;

        let cors = build_cors_layer(&["http://localhost:3000".to_string(), "*".to_string()]).unwrap();
        let app: Router = Router::new().route("/health", get(health)).layer(cors);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .header("origin", "https://anywhere.example")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response
            .headers()
            .get("access-control-allow-credentials")
            .is_none());
    }
}
