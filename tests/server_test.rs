mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{harness, two_shows, ScriptedFetcher, ScriptedProvider, SCHEDULE_HTML};
use karaoke_scraper::config::PipelineConfig;
use karaoke_scraper::promotion::Moderator;
use karaoke_scraper::server::{create_server, AppState};
use karaoke_scraper::service::ParseService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> axum::Router {
    let h = harness(
        ScriptedFetcher::new(SCHEDULE_HTML),
        ScriptedProvider::always(two_shows()),
        PipelineConfig::default(),
    );
    let state = Arc::new(AppState {
        moderator: Moderator::new(h.storage.clone(), h.frontier.clone(), None),
        parse: ParseService::new(h.pipeline),
    });
    create_server(state)
}

async fn call(app: axum::Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn post(uri: &str, body: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let (status, body) = call(app(), Request::builder().uri("/health").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn test_transform_endpoint() -> Result<()> {
    let request = post(
        "/api/transform-url",
        json!({ "url": "https://facebook.com/profile.php?id=100063&fbclid=abc" }),
    )?;
    let (status, body) = call(app(), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["transformedUrl"], "https://www.facebook.com/100063");

    let (status, body) = call(app(), post("/api/transform-url", json!({ "url": "nope" }))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["transformedUrl"], "nope");
    Ok(())
}

#[tokio::test]
async fn test_parse_endpoint_reports_discovered_urls() -> Result<()> {
    let request = post(
        "/api/parse",
        json!({ "url": "https://example.com/venue-schedule", "aiAnalysis": true }),
    )?;
    let (status, body) = call(app(), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["totalUrls"], 2);
    assert_eq!(body["data"]["discoveredUrls"], 1);
    assert_eq!(body["data"]["report"]["entries"], 2);
    Ok(())
}

#[tokio::test]
async fn test_parse_endpoint_rejects_bad_url() -> Result<()> {
    let (status, body) = call(app(), post("/api/parse", json!({ "url": "ftp://example.com/" }))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    Ok(())
}
