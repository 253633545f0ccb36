use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use voice_core::{Generator, HttpSnacCodec, HttpSpeechModel};

use server::config::ServerConfig;
use server::{build_router, open_cache, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice generation server...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, generation_timeout={}s",
        config.port, config.rate_limit_per_minute, config.generation_timeout_secs
    );

    let cache = open_cache(config.cache_config()).await;
    let stats = cache.stats();
    info!(
        "Voice cache ready: enabled={}, entries={}, dir={:?}",
        stats.enabled, stats.entry_count, stats.cache_dir
    );

    let model = Arc::new(HttpSpeechModel::new(
        &config.model_server_url,
        config.model_load_retries,
    ));
    let codec = Arc::new(HttpSnacCodec::new(&config.codec_server_url));

    let generator = Generator::new(model, codec, cache, config.generator_config());
    // Load in the background so /health can report progress
    generator.spawn_model_loader();

    let app = build_router(AppState::new(generator, config.clone()))?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
