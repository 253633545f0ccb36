//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use server::config::ServerConfig;
use server::{build_router, AppState};
use voice_core::{
    AudioCodec, CacheConfig, GenerationCache, Generator, GeneratorConfig, Latents,
    SamplingParams, SpeechModel, Waveform,
};

/// Model fake: one frame per text byte, optional delay, counts calls.
/// `load` fails `load_failures` times before succeeding.
pub struct FakeModel {
    pub calls: AtomicUsize,
    pub loaded: AtomicBool,
    pub fail: AtomicBool,
    pub delay: Duration,
    pub load_failures: AtomicUsize,
}

impl FakeModel {
    pub fn new(loaded: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            loaded: AtomicBool::new(loaded),
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
            load_failures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechModel for FakeModel {
    async fn load(&self) -> anyhow::Result<()> {
        let remaining = self.load_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.load_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("model server not reachable");
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn infer(
        &self,
        text: &str,
        _voice_description: &str,
        _sampling: SamplingParams,
    ) -> anyhow::Result<Latents> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("inference server returned 500");
        }
        let frames = text.len();
        Ok(Latents {
            levels: [vec![0; frames], vec![0; frames * 2], vec![0; frames * 4]],
        })
    }
}

/// 2048 + 2400 samples per frame, so every clip survives the warm-up trim
pub struct FakeCodec;

#[async_trait]
impl AudioCodec for FakeCodec {
    async fn encode(&self, latents: &Latents) -> anyhow::Result<Waveform> {
        Ok(Waveform {
            samples: vec![0.2; 2048 + latents.frames() * 2400],
            sample_rate: 24_000,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub generator: Generator,
    pub model: Arc<FakeModel>,
    pub cache: Arc<GenerationCache>,
}

/// Create a test app instance
pub fn create_test_app() -> TestApp {
    create_test_app_with(FakeModel::new(true))
}

pub fn create_test_app_with(model: FakeModel) -> TestApp {
    let model = Arc::new(model);
    let cache = Arc::new(GenerationCache::new(CacheConfig::in_memory()));
    let generator = Generator::new(
        model.clone(),
        Arc::new(FakeCodec),
        cache.clone(),
        GeneratorConfig {
            load_retry_delay: Duration::from_millis(10),
            ..GeneratorConfig::default()
        },
    );

    let config = ServerConfig {
        cache_dir: None,
        rate_limit_per_minute: 600,
        ..ServerConfig::default()
    };
    let router = build_router(AppState::new(generator.clone(), config)).expect("router");

    TestApp {
        router,
        generator,
        model,
        cache,
    }
}
