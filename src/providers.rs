//! Upstream generation services.
//!
//! The pipeline talks to models only through [`TextGenerator`] and
//! [`ImageGenerator`]. Both take the candidate model identifier per call, so
//! one instance serves the whole fallback list. Tests inject scripted mocks;
//! production uses:
//!
//! * [`LlmTextGenerator`]: any edgequake-llm chat provider (Gemini by default)
//! * [`GeminiImageGenerator`]: the Gemini `generateContent` REST endpoint,
//!   reading inline image parts from the response

use crate::config::PipelineConfig;
use crate::error::{CandidateError, PipelineError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Generates the structured-content JSON for a manuscript.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Ask `model` to apply `instruction` to `text`, returning the raw reply.
    async fn generate(&self, model: &str, instruction: &str, text: &str) -> Result<String, CandidateError>;
}

/// A binary image returned by an image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Generates images from a text prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Zero or more images for `prompt`. An empty vector is a valid answer;
    /// the caller treats it as a failure of this candidate.
    async fn generate(&self, model: &str, prompt: &str) -> Result<Vec<ImagePayload>, CandidateError>;
}

// ── Text: edgequake-llm ──────────────────────────────────────────────────

/// [`TextGenerator`] backed by an edgequake-llm provider.
///
/// A provider is created per call through [`ProviderFactory`], which reads
/// the matching API key (`GEMINI_API_KEY`, `OPENAI_API_KEY`, …) from the
/// environment.
pub struct LlmTextGenerator {
    provider: String,
    temperature: f32,
}

impl LlmTextGenerator {
    pub fn new(provider: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider: provider.into(),
            temperature,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.text_provider.clone(), config.temperature)
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(&self, model: &str, instruction: &str, text: &str) -> Result<String, CandidateError> {
        let provider: Arc<dyn LLMProvider> = ProviderFactory::create_llm_provider(&self.provider, model)
            .map_err(|e| CandidateError::Transport(format!("provider '{}': {e}", self.provider)))?;

        let messages = vec![ChatMessage::system(instruction), ChatMessage::user(text)];
        let options = build_options(self.temperature);

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(classify_llm_error)?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Completion options for the structuring call: JSON output mode so the
/// reply is a bare object.
fn build_options(temperature: f32) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        response_format: Some("json_object".to_string()),
        ..Default::default()
    }
}

fn classify_llm_error(e: LlmError) -> CandidateError {
    match e {
        LlmError::RateLimited(message) => CandidateError::RateLimited(message),
        other => CandidateError::from_message(other.to_string()),
    }
}

// ── Images: Gemini REST ──────────────────────────────────────────────────

/// [`ImageGenerator`] calling `POST /v1beta/models/{model}:generateContent`.
pub struct GeminiImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl GeminiImageGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, PipelineError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| PipelineError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: timeout.map(|t| t.as_secs()).unwrap_or(0),
        })
    }

    /// Build from config; fails when no API key is available.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let key = config.resolve_gemini_api_key().ok_or_else(|| {
            PipelineError::ConfigurationError(
                "Image generation needs a Gemini API key. Set GEMINI_API_KEY or use test mode.".into(),
            )
        })?;
        Self::new(config.gemini_base_url.clone(), key, config.api_timeout())
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<Vec<ImagePayload>, CandidateError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
        });

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CandidateError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    CandidateError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CandidateError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CandidateError::Api {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CandidateError::Malformed(e.to_string()))?;
        inline_images(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    mime_type: String,
    data: String,
}

/// Decode every inline image part of the first candidate.
fn inline_images(response: GenerateContentResponse) -> Result<Vec<ImagePayload>, CandidateError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    parts
        .into_iter()
        .filter_map(|p| p.inline_data)
        .map(|inline| {
            let data = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| CandidateError::Malformed(format!("inline image is not base64: {e}")))?;
            Ok(ImagePayload {
                mime_type: inline.mime_type,
                data,
            })
        })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}
