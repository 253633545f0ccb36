use thiserror::Error;

/// Errors produced by the voice generation core.
///
/// `Clone` because a single failed computation is reported to every caller
/// that was waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A miss arrived before the model finished loading.
    #[error("Model not loaded yet, try again shortly")]
    ModelNotReady,
}

impl Error {
    /// Wrap an adapter failure, keeping the whole cause chain in the message.
    pub fn generation(err: anyhow::Error) -> Self {
        Error::GenerationFailed(format!("{err:#}"))
    }

    pub fn cache_io(context: &str, err: std::io::Error) -> Self {
        Error::CacheUnavailable(format!("{context}: {err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
