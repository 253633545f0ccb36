//! Seams to the speech model and the audio codec.
//!
//! Both are large, slow to load and opaque to the rest of the crate; the
//! cache and orchestrator only ever see these traits.

use async_trait::async_trait;

use crate::request::SamplingParams;

/// Codec codes produced by the model, split into the codec's three
/// hierarchical levels (1, 2 and 4 codes per frame respectively).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Latents {
    pub levels: [Vec<u32>; 3],
}

impl Latents {
    /// Number of codec frames (one coarse code per frame)
    pub fn frames(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// Mono PCM waveform, samples in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Perform the one-time model load. Idempotent.
    async fn load(&self) -> anyhow::Result<()>;

    /// Whether [`SpeechModel::load`] has completed.
    fn is_loaded(&self) -> bool;

    /// Turn text plus a voice profile into codec latents.
    async fn infer(
        &self,
        text: &str,
        voice_description: &str,
        sampling: SamplingParams,
    ) -> anyhow::Result<Latents>;
}

#[async_trait]
pub trait AudioCodec: Send + Sync {
    /// Render latents to a waveform.
    async fn encode(&self, latents: &Latents) -> anyhow::Result<Waveform>;
}
