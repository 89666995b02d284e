use crate::promotion::Moderator;
use crate::service::{self, ParseService};
use crate::types::{ParseRequest, ParseResponse, TransformRequest};
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub struct AppState {
    pub parse: ParseService,
    pub moderator: Moderator,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": crate::constants::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn parse_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ParseRequest>,
) -> impl IntoResponse {
    let response: ParseResponse = state.parse.parse(request).await;
    let status = if response.success || response.data.is_some() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

async fn transform_handler(Json(request): Json<TransformRequest>) -> impl IntoResponse {
    let response = service::transform(&request);
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed".to_string()),
    }
}

/// Public listing: valid shows only
async fn shows_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    match state.moderator.list_public_shows().await {
        Ok(shows) => Json(shows).into_response(),
        Err(e) => {
            error!("Failed to list shows: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/parse", post(parse_handler))
        .route("/api/transform-url", post(transform_handler))
        .route("/api/shows", get(shows_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

pub async fn start_server(state: Arc<AppState>, port: u16) -> Result<(), hyper::Error> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server listening on http://{}", addr);
    info!("Health check: http://localhost:{}/health", port);

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
}
