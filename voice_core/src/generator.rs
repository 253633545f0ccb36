//! Request orchestration: key derivation, cache lookup and the
//! model -> codec -> WAV pipeline on a miss.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{AudioCodec, SpeechModel};
use crate::cache::{CacheEntry, GenerationCache, Lookup};
use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::request::GenerationRequest;
use crate::wav;

/// Result of one `generate` call.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub entry: Arc<CacheEntry>,
    pub lookup: Lookup,
    pub duration_seconds: f64,
}

impl GeneratedAudio {
    pub fn audio_bytes(&self) -> &[u8] {
        &self.entry.audio_bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.entry.sample_rate
    }
}

#[derive(Clone)]
pub struct Generator {
    model: Arc<dyn SpeechModel>,
    codec: Arc<dyn AudioCodec>,
    cache: Arc<GenerationCache>,
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(
        model: Arc<dyn SpeechModel>,
        codec: Arc<dyn AudioCodec>,
        cache: Arc<GenerationCache>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            model,
            codec,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    /// Load the model in the background, retrying until it succeeds.
    pub fn spawn_model_loader(&self) -> JoinHandle<()> {
        let model = Arc::clone(&self.model);
        let retry_delay = self.config.load_retry_delay;
        tokio::spawn(async move {
            let mut attempt = 1u32;
            loop {
                info!("Loading speech model (attempt {attempt})");
                match model.load().await {
                    Ok(()) => {
                        info!("Speech model ready");
                        return;
                    }
                    Err(e) => {
                        warn!("Speech model failed to load: {e:#}");
                        attempt += 1;
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        })
    }

    /// Produce the WAV for `request`, from the cache when possible.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAudio> {
        let key = CacheKey::derive(&request);
        let started = Instant::now();

        let pipeline = Pipeline {
            model: Arc::clone(&self.model),
            codec: Arc::clone(&self.codec),
            config: self.config.clone(),
        };
        let (entry, lookup) = self
            .cache
            .get_or_compute(key, pipeline.run(key, request))
            .await?;

        info!(
            %key,
            cache = lookup.as_str(),
            "Generated {:.2}s of audio in {}ms",
            entry.duration_seconds(),
            started.elapsed().as_millis()
        );

        Ok(GeneratedAudio {
            duration_seconds: entry.duration_seconds(),
            entry,
            lookup,
        })
    }
}

/// Owned copy of what one computation needs, so it can outlive the caller.
struct Pipeline {
    model: Arc<dyn SpeechModel>,
    codec: Arc<dyn AudioCodec>,
    config: GeneratorConfig,
}

impl Pipeline {
    async fn run(self, key: CacheKey, request: GenerationRequest) -> Result<CacheEntry> {
        let timeout = self.config.generation_timeout;
        match tokio::time::timeout(timeout, self.synthesize(key, &request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::GenerationFailed(format!(
                "generation timed out after {}s",
                timeout.as_secs_f64()
            ))),
        }
    }

    async fn synthesize(&self, key: CacheKey, request: &GenerationRequest) -> Result<CacheEntry> {
        // Hits never get here, so stored audio stays available while loading.
        if !self.model.is_loaded() {
            return Err(Error::ModelNotReady);
        }
        debug!(%key, text_len = request.text().len(), "Running model inference");
        let latents = self
            .model
            .infer(request.text(), request.voice_description(), request.sampling())
            .await
            .map_err(Error::generation)?;
        if latents.is_empty() {
            return Err(Error::GenerationFailed(
                "model produced no audio frames".to_string(),
            ));
        }

        let mut waveform = self
            .codec
            .encode(&latents)
            .await
            .map_err(Error::generation)?;

        // Drop the codec's warm-up samples, but never empty a short clip.
        let trim = self.config.warmup_trim_samples;
        if waveform.samples.len() > trim {
            waveform.samples.drain(..trim);
        }

        let audio_bytes =
            wav::encode_wav(&waveform.samples, waveform.sample_rate).map_err(Error::generation)?;
        Ok(CacheEntry::new(
            key,
            audio_bytes,
            waveform.sample_rate,
            waveform.samples.len() as u64,
        ))
    }
}
