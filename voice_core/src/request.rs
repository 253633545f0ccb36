use crate::error::{Error, Result};
use crate::key::{normalize_text, quantize, PARAM_SCALE};

/// Maximum text length accepted for a single generation
pub const MAX_TEXT_LENGTH: usize = 5000;

pub const DEFAULT_TEMPERATURE: f32 = 0.4;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Temperature must land in (0, 2] after quantization.
const MAX_TEMPERATURE_STEPS: u32 = 200;
/// top_p must land in (0, 1] after quantization.
const MAX_TOP_P_STEPS: u32 = 100;

/// A validated, normalized generation request.
///
/// Only constructible through [`GenerationRequest::new`], so every value in
/// circulation is already trimmed and has its sampling parameters quantized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    text: String,
    voice_description: String,
    temperature_steps: u32,
    top_p_steps: u32,
}

impl GenerationRequest {
    pub fn new(
        text: &str,
        voice_description: &str,
        temperature: f32,
        top_p: f32,
    ) -> Result<Self> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Err(Error::InvalidRequest("Text cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_TEXT_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "Text too long (max {} characters)",
                MAX_TEXT_LENGTH
            )));
        }

        let voice_description = normalize_text(voice_description);
        if voice_description.is_empty() {
            return Err(Error::InvalidRequest(
                "Voice description cannot be empty".to_string(),
            ));
        }

        let temperature_steps = match quantize(temperature) {
            Some(steps) if (1..=MAX_TEMPERATURE_STEPS).contains(&steps) => steps,
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "temperature must be in (0, 2], got {temperature}"
                )))
            }
        };
        let top_p_steps = match quantize(top_p) {
            Some(steps) if (1..=MAX_TOP_P_STEPS).contains(&steps) => steps,
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "top_p must be in (0, 1], got {top_p}"
                )))
            }
        };

        Ok(Self {
            text: text.to_string(),
            voice_description: voice_description.to_string(),
            temperature_steps,
            top_p_steps,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice_description(&self) -> &str {
        &self.voice_description
    }

    /// Temperature as passed to the model (the quantized value).
    pub fn temperature(&self) -> f32 {
        self.temperature_steps as f32 / PARAM_SCALE
    }

    pub fn top_p(&self) -> f32 {
        self.top_p_steps as f32 / PARAM_SCALE
    }

    pub(crate) fn temperature_steps(&self) -> u32 {
        self.temperature_steps
    }

    pub(crate) fn top_p_steps(&self) -> u32 {
        self.top_p_steps
    }

    /// Sampling parameters in the shape the model adapter expects.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature(),
            top_p: self.top_p(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
}
