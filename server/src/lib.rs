pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod validation;

pub use routes::{build_router, AppState};

use std::sync::Arc;

use tracing::warn;
use voice_core::{CacheConfig, GenerationCache};

/// Open the cache, falling back to memory only if the directory is unusable.
pub async fn open_cache(config: CacheConfig) -> Arc<GenerationCache> {
    match GenerationCache::open(config.clone()).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!("Voice cache directory unavailable, keeping entries in memory only: {e}");
            Arc::new(GenerationCache::new(CacheConfig { dir: None, ..config }))
        }
    }
}
