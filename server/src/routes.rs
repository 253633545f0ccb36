use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use voice_core::{CacheStats, GeneratedAudio, Generator};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{AppMetrics, DetailedMetricsResponse, EndpointMetrics};
use crate::validation::{
    json_body, validate_generate_request, GenerateBody, DEFAULT_VOICE_DESCRIPTION,
};

pub const SERVICE_NAME: &str = "Emotional Voice TTS API";
pub const MODEL_ID: &str = "maya-research/maya1";
pub const VOICE_NAME: &str = "Default";

const SUPPORTED_EMOTIONS: [&str; 12] = [
    "laugh",
    "laugh_harder",
    "chuckle",
    "giggle",
    "whisper",
    "sigh",
    "gasp",
    "angry",
    "cry",
    "confident",
    "warm",
    "intelligent",
];

#[derive(Clone)]
pub struct AppState {
    pub generator: Generator,
    pub metrics: Arc<AppMetrics>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(generator: Generator, config: ServerConfig) -> Self {
        Self {
            generator,
            metrics: Arc::new(AppMetrics::new()),
            config,
        }
    }
}

/// All API routes, mounted at the root and under `/api`, with the
/// middleware stack applied.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    // Rate limiting is global: all clients share one bucket
    let per_second = u64::from((config.rate_limit_per_minute / 60).max(1));
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(per_second)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    let api = Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .route("/voice/info", get(voice_info))
        .route("/generate", post(generate_endpoint))
        .route("/generate/info", post(generate_info_endpoint))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(cache_clear))
        .route("/metrics", get(metrics_endpoint));

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers([
            HeaderName::from_static("x-duration-seconds"),
            HeaderName::from_static("x-sample-rate"),
            HeaderName::from_static("x-cache"),
        ])
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        base.allow_origin(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let Ok(request_id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) else {
        return next.run(request).await;
    };
    request.headers_mut().insert("x-request-id", request_id.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", request_id);
    response
}

async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "online",
        "model": MODEL_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "voice": DEFAULT_VOICE_DESCRIPTION,
    }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let model_loaded = state.generator.model_loaded();
    let (status, label) = if model_loaded {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            model_loaded,
        }),
    )
}

pub async fn voice_info() -> Json<Value> {
    Json(json!({
        "voice_name": VOICE_NAME,
        "description": DEFAULT_VOICE_DESCRIPTION,
        "model": MODEL_ID,
        "sample_rate": voice_core::snac::SNAC_SAMPLE_RATE,
        "supported_emotions": SUPPORTED_EMOTIONS,
        "usage_example": {
            "text": "Hello Hollywood! <chuckle> Let's build something amazing.",
            "description": DEFAULT_VOICE_DESCRIPTION,
        },
    }))
}

async fn generate_checked(
    state: &AppState,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<GeneratedAudio, ApiError> {
    let body = json_body(payload)?;
    let request = validate_generate_request(&body)?;
    info!(
        "Generate request: text length={}, temperature={}, top_p={}",
        request.text().len(),
        request.temperature(),
        request.top_p()
    );
    Ok(state.generator.generate(request).await?)
}

/// Generate and record timing against `endpoint`.
async fn run_generation(
    state: &AppState,
    endpoint: &EndpointMetrics,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<GeneratedAudio, ApiError> {
    state.metrics.count_request();
    let started = Instant::now();

    let result = generate_checked(state, payload).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    endpoint.record_request(elapsed_ms, result.is_err());
    if let Ok(audio) = &result {
        state
            .metrics
            .generation
            .record(elapsed_ms, audio.entry.sample_count, audio.lookup);
    }
    result
}

pub async fn generate_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let audio = run_generation(&state, &state.metrics.generate, payload).await?;

    let headers = [
        (header::CONTENT_TYPE, "audio/wav".to_string()),
        (
            header::CONTENT_DISPOSITION,
            "inline; filename=speech.wav".to_string(),
        ),
        (
            HeaderName::from_static("x-duration-seconds"),
            audio.duration_seconds.to_string(),
        ),
        (
            HeaderName::from_static("x-sample-rate"),
            audio.sample_rate().to_string(),
        ),
        (
            HeaderName::from_static("x-cache"),
            audio.lookup.as_str().to_string(),
        ),
    ];

    Ok((headers, audio.audio_bytes().to_vec()).into_response())
}

#[derive(Serialize)]
pub struct GenerateInfoResponse {
    pub success: bool,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub message: String,
}

pub async fn generate_info_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<GenerateInfoResponse>, ApiError> {
    let audio = run_generation(&state, &state.metrics.generate_info, payload).await?;

    Ok(Json(GenerateInfoResponse {
        success: true,
        duration_seconds: audio.duration_seconds,
        sample_rate: audio.sample_rate(),
        message: format!(
            "Generated {} samples ({:.2}s)",
            audio.entry.sample_count, audio.duration_seconds
        ),
    }))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.generator.cache().stats())
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub cleared: usize,
    pub message: String,
}

pub async fn cache_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.generator.cache().clear().await;
    Json(ClearResponse {
        success: true,
        cleared,
        message: format!("Voice cache cleared ({cleared} entries)"),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    Json(state.metrics.report(state.generator.cache().stats()))
}
