//! Emotional speech generation with a single-flight voice cache.
//!
//! A [`Generator`] turns a [`GenerationRequest`] into WAV audio by running a
//! [`SpeechModel`] and an [`AudioCodec`], memoizing results in a
//! [`GenerationCache`] keyed by [`CacheKey`].

pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod key;
pub mod remote;
pub mod request;
pub mod snac;
pub mod wav;

pub use adapters::{AudioCodec, Latents, SpeechModel, Waveform};
pub use cache::{CacheEntry, CacheStats, GenerationCache, Lookup};
pub use config::{CacheConfig, ClearPolicy, GeneratorConfig};
pub use error::{Error, Result};
pub use generator::{GeneratedAudio, Generator};
pub use key::CacheKey;
pub use remote::{HttpSnacCodec, HttpSpeechModel};
pub use request::{GenerationRequest, SamplingParams};
