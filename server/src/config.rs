// Configuration for the server, read from the environment

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use voice_core::{CacheConfig, ClearPolicy, GeneratorConfig};

const DEFAULT_CACHE_DIR: &str = "/tmp/voice_cache";
const DEFAULT_MODEL_SERVER_URL: &str = "http://127.0.0.1:8001";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub cache_enabled: bool,
    /// `None` keeps the cache in memory only
    pub cache_dir: Option<PathBuf>,
    pub cache_max_bytes: u64,
    pub cache_clear_policy: ClearPolicy,
    pub model_server_url: String,
    pub codec_server_url: String,
    pub model_load_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            request_timeout_secs: 300,
            generation_timeout_secs: 120,
            cors_allowed_origins: None,
            cache_enabled: true,
            cache_dir: Some(PathBuf::from(DEFAULT_CACHE_DIR)),
            cache_max_bytes: 512 * 1024 * 1024,
            cache_clear_policy: ClearPolicy::Retain,
            model_server_url: DEFAULT_MODEL_SERVER_URL.to_string(),
            codec_server_url: DEFAULT_MODEL_SERVER_URL.to_string(),
            model_load_retries: 60,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PORT").unwrap_or(defaults.port);

        let rate_limit_per_minute =
            env_parse("RATE_LIMIT_PER_MINUTE").unwrap_or(defaults.rate_limit_per_minute);

        let request_timeout_secs =
            env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs);

        let generation_timeout_secs =
            env_parse("GENERATION_TIMEOUT_SECS").unwrap_or(defaults.generation_timeout_secs);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        let cache_enabled = env_parse("VOICE_CACHE_ENABLED").unwrap_or(defaults.cache_enabled);

        let cache_dir = match std::env::var("VOICE_CACHE_DIR") {
            Ok(dir) if dir.trim().is_empty() => None,
            Ok(dir) => Some(PathBuf::from(dir.trim())),
            Err(_) => defaults.cache_dir,
        };

        let cache_max_bytes =
            env_parse("VOICE_CACHE_MAX_BYTES").unwrap_or(defaults.cache_max_bytes);

        let cache_clear_policy = match std::env::var("VOICE_CACHE_CLEAR_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{e}, falling back to retain");
                ClearPolicy::Retain
            }),
            Err(_) => defaults.cache_clear_policy,
        };

        let model_server_url = std::env::var("MODEL_SERVER_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.model_server_url);

        let codec_server_url = std::env::var("CODEC_SERVER_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| model_server_url.clone());

        let model_load_retries =
            env_parse("MODEL_LOAD_RETRIES").unwrap_or(defaults.model_load_retries);

        Self {
            port,
            rate_limit_per_minute,
            request_timeout_secs,
            generation_timeout_secs,
            cors_allowed_origins,
            cache_enabled,
            cache_dir,
            cache_max_bytes,
            cache_clear_policy,
            model_server_url,
            codec_server_url,
            model_load_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache_enabled,
            dir: self.cache_dir.clone(),
            max_bytes: self.cache_max_bytes,
            clear_policy: self.cache_clear_policy,
            ..CacheConfig::default()
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            generation_timeout: self.generation_timeout(),
            ..GeneratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_into_core_config() {
        let config = ServerConfig::default();
        let cache = config.cache_config();
        assert!(cache.enabled);
        assert_eq!(cache.dir.as_deref(), Some(std::path::Path::new("/tmp/voice_cache")));
        assert_eq!(cache.max_bytes, 536_870_912);
        assert_eq!(cache.clear_policy, ClearPolicy::Retain);
        assert_eq!(config.generator_config().generation_timeout, Duration::from_secs(120));
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
    }
}
