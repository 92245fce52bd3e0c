//! HTTP surface: the recording middleware, role guard, stats and reset
//! endpoints driven through the axum router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use req_telemetry::http::create_api_router;
use req_telemetry::MemoryStore;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "integration-test")
        .header("x-forwarded-for", "203.0.113.5");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn middleware_records_every_request() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());
    let router = create_api_router(api.clone());

    let (status, body) = send(&router, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    api.recorder.drain().await;
    let (status, _) = send(&router, request("GET", "/api/v1/stats", Some(common::USER_TOKEN))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    api.recorder.drain().await;
    let (status, _) = send(&router, request("POST", "/health", None)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    api.recorder.drain().await;

    let stats = api.stats.query().await;
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.method_counts["GET"], 2);
    assert_eq!(stats.method_counts["POST"], 1);
    assert_eq!(stats.role_counts["anonymous"], 2);
    assert_eq!(stats.role_counts["user"], 1);
    assert_eq!(stats.role_method_counts["user"]["GET"], 1);
    assert_eq!(stats.status_counts["200"], 1);
    assert_eq!(stats.status_counts["403"], 1);
    assert_eq!(stats.status_counts["405"], 1);
    assert_eq!(stats.status_category_counts["4xx"], 2);

    let newest = stats.recent_requests[0].event().unwrap();
    assert_eq!(newest.path, "/health");
    assert_eq!(newest.client_address, "203.0.113.5");
    assert_eq!(newest.user_agent, "integration-test");
    assert_eq!(newest.method, req_telemetry::HttpMethod::Post);
    assert_eq!(newest.status_code, 405);
}

#[tokio::test]
async fn stats_endpoint_requires_admin_and_returns_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());
    let router = create_api_router(api.clone());

    let (status, body) = send(&router, request("GET", "/api/v1/stats", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("anonymous"));
    api.recorder.drain().await;

    let (status, body) = send(&router, request("GET", "/api/v1/stats", Some(common::ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statusCounts"]["403"], 1);
    assert_eq!(body["statusCategoryCounts"]["4xx"], 1);
    assert_eq!(body["roleCounts"]["anonymous"], 1);
    assert_eq!(body["recentRequests"][0]["path"], "/api/v1/stats");
    assert_eq!(body["recentRequests"][0]["statusCode"], 403);
    assert_eq!(body["recentRequests"][0]["statusCategory"], "4xx");
    assert!(body.get("status").is_none());
}

#[tokio::test]
async fn telemetry_outage_never_changes_responses() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store.clone(), common::fast_query_options());
    let router = create_api_router(api.clone());
    store.set_available(false);

    let (status, body) = send(&router, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "disconnected");

    let (status, body) = send(&router, request("GET", "/api/v1/stats", Some(common::ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["totalRequests"], 0);

    let (status, body) = send(&router, request("POST", "/api/v1/stats/reset", Some(common::ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    api.recorder.drain().await;
}

#[tokio::test]
async fn reset_endpoint_clears_counters() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());
    let router = create_api_router(api.clone());

    for _ in 0..3 {
        send(&router, request("GET", "/api/v1/stats", None)).await;
    }
    api.recorder.drain().await;
    assert_eq!(api.stats.query().await.status_counts["403"], 3);

    let (status, _) = send(&router, request("POST", "/api/v1/stats/reset", Some(common::USER_TOKEN))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    api.recorder.drain().await;

    let (status, body) = send(&router, request("POST", "/api/v1/stats/reset", Some(common::ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["deleted"].as_u64().unwrap() > 0);
    api.recorder.drain().await;

    let stats = api.stats.query().await;
    assert!(!stats.status_counts.contains_key("403"));
    assert_eq!(stats.status_counts.get("200"), Some(&1));
    assert_eq!(stats.recent_requests.len(), 1);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["recentRequests"][0]["statusCode"], 200);
    assert_eq!(json["recentRequests"][0]["statusCategory"], "2xx");
}

#[tokio::test]
async fn metrics_endpoint_exposes_text_format() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());
    let router = create_api_router(api);

    let response = router.oneshot(request("GET", "/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}
