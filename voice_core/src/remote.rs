//! HTTP-backed model and codec adapters.
//!
//! The model and the codec run in a separate inference server. These clients
//! speak its small JSON protocol and keep the token-to-latent bookkeeping on
//! this side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::{AudioCodec, Latents, SpeechModel, Waveform};
use crate::request::SamplingParams;
use crate::snac::{self, CODE_END_TOKEN_ID};

const MAX_NEW_TOKENS: u32 = 2048;
const MIN_NEW_TOKENS: u32 = 28;
const REPETITION_PENALTY: f32 = 1.1;
const LOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Prompt layout the model was fine-tuned on.
pub fn build_prompt(voice_description: &str, text: &str) -> String {
    format!("<description=\"{voice_description}\"> {text}")
}

/// Structure for the inference server's generate request
#[derive(Serialize)]
struct InferRequest<'a> {
    prompt: &'a str,
    temperature: f32,
    top_p: f32,
    max_new_tokens: u32,
    min_new_tokens: u32,
    repetition_penalty: f32,
    eos_token_id: u32,
}

#[derive(Deserialize)]
struct InferResponse {
    token_ids: Vec<u32>,
}

#[derive(Serialize)]
struct DecodeRequest<'a> {
    levels: &'a [Vec<u32>; 3],
}

#[derive(Deserialize)]
struct DecodeResponse {
    samples: Vec<f32>,
    sample_rate: u32,
}

pub struct HttpSpeechModel {
    client: Client,
    base_url: String,
    load_retries: u32,
    loaded: AtomicBool,
}

impl HttpSpeechModel {
    pub fn new(base_url: &str, load_retries: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            load_retries,
            loaded: AtomicBool::new(false),
        }
    }

    async fn check_health(&self) -> Result<()> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl SpeechModel for HttpSpeechModel {
    async fn load(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.check_health().await {
                Ok(()) => break,
                Err(e) if attempt < self.load_retries => {
                    attempt += 1;
                    if attempt == 1 || attempt % 10 == 0 {
                        warn!("Model server at {} not ready ({e}), retrying", self.base_url);
                    }
                    tokio::time::sleep(LOAD_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("model server at {} never became ready", self.base_url)
                    })
                }
            }
        }

        self.loaded.store(true, Ordering::Release);
        info!("Model server at {} is ready", self.base_url);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn infer(
        &self,
        text: &str,
        voice_description: &str,
        sampling: SamplingParams,
    ) -> Result<Latents> {
        let prompt = build_prompt(voice_description, text);
        let req_body = InferRequest {
            prompt: &prompt,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_new_tokens: MAX_NEW_TOKENS,
            min_new_tokens: MIN_NEW_TOKENS,
            repetition_penalty: REPETITION_PENALTY,
            eos_token_id: CODE_END_TOKEN_ID,
        };

        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .json(&req_body)
            .send()
            .await
            .context("inference request failed")?
            .error_for_status()?
            .json::<InferResponse>()
            .await
            .context("malformed inference response")?;

        snac::latents_from_tokens(&response.token_ids)
    }
}

pub struct HttpSnacCodec {
    client: Client,
    base_url: String,
}

impl HttpSnacCodec {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AudioCodec for HttpSnacCodec {
    async fn encode(&self, latents: &Latents) -> Result<Waveform> {
        let response = self
            .client
            .post(format!("{}/decode", self.base_url))
            .json(&DecodeRequest {
                levels: &latents.levels,
            })
            .send()
            .await
            .context("codec request failed")?
            .error_for_status()?
            .json::<DecodeResponse>()
            .await
            .context("malformed codec response")?;

        Ok(Waveform {
            samples: response.samples,
            sample_rate: response.sample_rate,
        })
    }
}
