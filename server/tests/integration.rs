//! Integration tests for the HTTP surface

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use server::open_cache;
use server::validation::{validate_generate_request, GenerateBody};
use voice_core::{CacheConfig, CacheEntry, CacheKey};

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();
    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
}

#[tokio::test]
async fn test_health_reports_unloaded_model() {
    let app = create_test_app_with(FakeModel::new(false));
    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_service_and_voice_info() {
    let app = create_test_app();

    let response = app.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "online");
    assert_eq!(body["model"], "maya-research/maya1");

    let response = app.router.oneshot(get("/voice/info")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["sample_rate"], 24_000);
    let emotions = body["supported_emotions"].as_array().unwrap();
    assert_eq!(emotions.len(), 12);
    assert!(emotions.contains(&json!("chuckle")));
}

#[tokio::test]
async fn test_generate_returns_wav_and_caches() {
    let app = create_test_app();
    let request = json!({ "text": "Hello Hollywood!" });

    let first = app
        .router
        .clone()
        .oneshot(post_json("/generate", request.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[header::CONTENT_TYPE], "audio/wav");
    assert_eq!(
        first.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=speech.wav"
    );
    assert_eq!(first.headers()["x-sample-rate"], "24000");
    assert_eq!(first.headers()["x-cache"], "miss");
    // 16 frames * 2400 samples at 24 kHz
    assert_eq!(first.headers()["x-duration-seconds"], "1.6");
    let first_bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&first_bytes[0..4], b"RIFF");

    let second = app
        .router
        .clone()
        .oneshot(post_json("/api/generate", request))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-cache"], "hit");
    let second_bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_eq!(first_bytes, second_bytes);

    assert_eq!(app.model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.cache.stats().entry_count, 1);
}

#[tokio::test]
async fn test_concurrent_generate_runs_model_once() {
    let mut model = FakeModel::new(true);
    model.delay = Duration::from_millis(50);
    let app = create_test_app_with(model);

    let requests = (0..4).map(|_| {
        app.router
            .clone()
            .oneshot(post_json("/generate", json!({ "text": "Great job!" })))
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        assert_eq!(response.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.cache.stats().entry_count, 1);
}

#[tokio::test]
async fn test_generate_info() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(post_json(
            "/generate/info",
            json!({ "text": "Hi", "description": "Calm narrator", "temperature": 0.6 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["sample_rate"], 24_000);
    assert_eq!(body["duration_seconds"], 0.2);
    assert_eq!(body["message"], "Generated 4800 samples (0.20s)");
}

#[tokio::test]
async fn test_generate_empty_text() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(post_json("/generate", json!({ "text": "   " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], 400);
    assert!(body["error"].as_str().unwrap().contains("empty"));
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.cache.stats().entry_count, 0);
}

#[tokio::test]
async fn test_generate_rejects_unknown_fields() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(post_json(
            "/generate",
            json!({ "text": "Hi", "language": "en_US" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_generate_rejects_malformed_json() {
    let app = create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_before_model_loaded() {
    let app = create_test_app_with(FakeModel::new(false));
    let response = app
        .router
        .oneshot(post_json("/generate", json!({ "text": "Too early" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], 503);
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cached_audio_is_served_before_model_loaded() {
    let app = create_test_app_with(FakeModel::new(false));

    let body: GenerateBody = serde_json::from_value(json!({ "text": "Hi" })).unwrap();
    let key = CacheKey::derive(&validate_generate_request(&body).unwrap());
    let wav = voice_core::wav::encode_wav(&[0.1; 2400], 24_000).unwrap();
    app.cache
        .get_or_compute(key, async move { Ok(CacheEntry::new(key, wav, 24_000, 2400)) })
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(post_json("/generate", json!({ "text": "Hi" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "hit");
    assert_eq!(response.headers()["x-duration-seconds"], "0.1");
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_model_becomes_usable_after_failed_loads() {
    let model = FakeModel::new(false);
    model.load_failures.store(2, Ordering::SeqCst);
    let app = create_test_app_with(model);

    let response = app
        .router
        .clone()
        .oneshot(post_json("/generate", json!({ "text": "Wake up" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    tokio::time::timeout(Duration::from_secs(5), app.generator.spawn_model_loader())
        .await
        .expect("loader finished")
        .unwrap();
    assert_eq!(app.model.load_failures.load(Ordering::SeqCst), 0);

    let health = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(post_json("/generate", json!({ "text": "Wake up" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "miss");
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unusable_cache_dir_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let not_a_dir = dir.path().join("cache-file");
    std::fs::write(&not_a_dir, b"occupied").unwrap();

    let cache = open_cache(CacheConfig::with_dir(not_a_dir.clone())).await;
    let stats = cache.stats();
    assert!(stats.enabled);
    assert_eq!(stats.cache_dir, None);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_500_and_retryable() {
    let app = create_test_app();
    app.model.fail.store(true, Ordering::SeqCst);

    let response = app
        .router
        .clone()
        .oneshot(post_json("/generate", json!({ "text": "Flaky" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("inference server returned 500"));

    app.model.fail.store(false, Ordering::SeqCst);
    let response = app
        .router
        .oneshot(post_json("/generate", json!({ "text": "Flaky" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "miss");
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let app = create_test_app();
    for text in ["one", "two"] {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/generate", json!({ "text": text })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.router.clone().oneshot(get("/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["entry_count"], 2);
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["clear_policy"], "retain");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cache/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["cleared"], 2);

    let stats = json_body(app.router.oneshot(get("/api/cache/stats")).await.unwrap()).await;
    assert_eq!(stats["entry_count"], 0);
    assert_eq!(stats["total_bytes"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_test_app();
    app.router
        .clone()
        .oneshot(post_json("/generate", json!({ "text": "count me" })))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["endpoints"]["generate"]["request_count"], 1);
    assert_eq!(body["generation"]["cache_misses"], 1);
    assert_eq!(body["cache"]["entry_count"], 1);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = create_test_app();
    let response = app.router.oneshot(get("/api/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], 404);
}
