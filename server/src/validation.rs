use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use voice_core::request::{DEFAULT_TEMPERATURE, DEFAULT_TOP_P, MAX_TEXT_LENGTH};
use voice_core::GenerationRequest;

use crate::error::ApiError;

/// Voice used when a request does not describe one.
pub const DEFAULT_VOICE_DESCRIPTION: &str = "Female voice in her 30s with an American accent. \
Confident, intelligent, warm tone with clear diction. Professional yet friendly, conversational pacing.";

/// Body of `POST /generate` and `POST /generate/info`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateBody {
    pub text: String,
    #[serde(default, alias = "voice_description")]
    pub description: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f32 {
    DEFAULT_TOP_P
}

/// Turn a JSON extraction failure into a 400 with the usual error body.
pub fn json_body<T>(payload: Result<axum::Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|axum::Json(body)| body)
        .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))
}

/// Validate a generate request and build the normalized core request
pub fn validate_generate_request(body: &GenerateBody) -> Result<GenerationRequest, ApiError> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    let description = body
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_VOICE_DESCRIPTION);

    Ok(GenerationRequest::new(
        text,
        description,
        body.temperature,
        body.top_p,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> GenerateBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults_are_applied() {
        let req = validate_generate_request(&body(r#"{"text": "Hello"}"#)).unwrap();
        assert_eq!(req.text(), "Hello");
        assert_eq!(req.voice_description(), DEFAULT_VOICE_DESCRIPTION);
        assert_eq!(req.temperature(), 0.4);
        assert_eq!(req.top_p(), 0.9);
    }

    #[test]
    fn test_voice_description_alias() {
        let req = validate_generate_request(&body(
            r#"{"text": "Hi", "voice_description": "Deep male voice", "temperature": 0.7}"#,
        ))
        .unwrap();
        assert_eq!(req.voice_description(), "Deep male voice");
        assert_eq!(req.temperature(), 0.7);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let parsed: Result<GenerateBody, _> =
            serde_json::from_str(r#"{"text": "Hi", "language": "en"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_empty_text() {
        let result = validate_generate_request(&body(r#"{"text": "  "}"#));
        assert!(matches!(result, Err(ApiError::InvalidInput(msg)) if msg.contains("empty")));
    }

    #[test]
    fn test_validate_too_long() {
        let long_text = "a".repeat(6000);
        let result = validate_generate_request(&GenerateBody {
            text: long_text,
            description: None,
            temperature: 0.4,
            top_p: 0.9,
        });
        assert!(matches!(result, Err(ApiError::InvalidInput(msg)) if msg.contains("too long")));
    }

    #[test]
    fn test_out_of_range_sampling_is_invalid() {
        let result = validate_generate_request(&body(r#"{"text": "Hi", "top_p": 1.5}"#));
        assert!(matches!(
            result,
            Err(ApiError::Generation(voice_core::Error::InvalidRequest(_)))
        ));
    }
}
