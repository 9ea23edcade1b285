use crate::config::ApiConfig;
use crate::query::{CatalogQueryService, ImageListQuery, ImageListResponse, QueryError, QueryMode};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<CatalogQueryService>,
}

/// Error body for every non-200 response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match self {
            QueryError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            QueryError::Failure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = ?self, "Catalog query failed");
            metrics::counter!("catalog.query.failed").increment(1);
        }
        (
            status,
            Json(ErrorResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Origin allow-list with a fallback for unrecognized callers
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    /// The request origin when allow-listed, otherwise the first configured origin
    pub fn resolve(&self, origin: Option<&str>) -> Option<&str> {
        origin
            .and_then(|o| self.allowed_origins.iter().find(|allowed| *allowed == o))
            .or_else(|| self.allowed_origins.first())
            .map(String::as_str)
    }

    fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        if let Some(allowed) = self.resolve(origin) {
            match HeaderValue::from_str(allowed) {
                Ok(value) => {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                }
                Err(e) => warn!(error = %e, origin = %allowed, "Unusable CORS origin"),
            }
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,OPTIONS"),
        );
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}

async fn cors(State(policy): State<Arc<CorsPolicy>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    policy.apply(origin.as_deref(), response.headers_mut());
    response
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let policy = Arc::new(CorsPolicy::new(config.cors_origins.clone()));

    Router::new()
        .route("/", get(list_images))
        .route("/images", get(list_images))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(policy, cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn a handler panic into the regular JSON 500 body
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(panic = %detail, "Handler panicked");
    metrics::counter!("catalog.query.failed").increment(1);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            message: "Internal server error".to_string(),
        }),
    )
        .into_response()
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "lgtm-catalog"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.query.catalog().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List, look up, or search catalog images
#[instrument(skip(state))]
async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ImageListQuery>,
) -> Result<Json<ImageListResponse>, QueryError> {
    let mode = QueryMode::from_params(&params)?;
    let response = state.query.execute(mode).await?;
    metrics::counter!("catalog.query.served").increment(1);
    Ok(Json(response))
}

/// Start the catalog query API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting catalog query API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
