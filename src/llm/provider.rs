use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AnalysisConfig, DetailHint, ModelConfig, ProviderDialect};

/// Errors from a single provider invocation. Transport, HTTP, and malformed
/// payloads are all attempt-level failures; the dispatcher moves on to the
/// next candidate model.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}")]
    Http { status: u16 },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("failed to read image: {0}")]
    Image(String),
}

impl From<ureq::Error> for ProviderError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => ProviderError::Http { status },
            ureq::Error::Transport(t) => ProviderError::Transport(t.to_string()),
        }
    }
}

/// Fixed request contract carried to every provider: a system/user prompt
/// pair and a detail hint. The adapter translates it into its own dialect.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub detail: DetailHint,
}

impl AnalysisRequest {
    /// Build the standard analysis request from configuration. The optional
    /// custom prompt is prepended as context, the way the base prompt can be
    /// extended without replacing it.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let user_prompt = match &config.custom_prompt {
            Some(context) => format!("Context: {}\n\n{}", context, base_analysis_prompt()),
            None => base_analysis_prompt().to_string(),
        };

        Self {
            system_prompt: system_prompt().to_string(),
            user_prompt,
            detail: config.detail,
        }
    }
}

/// Trait for AI providers that can analyze photos.
///
/// Implementations return the raw response text; interpretation is owned by
/// the validator, which keeps the dispatcher agnostic to dialect quirks.
pub trait VisionProvider: Send + Sync {
    /// Analyze the image at the given path, returning the provider's raw
    /// response text.
    fn analyze(&self, image_path: &Path, request: &AnalysisRequest) -> Result<String, ProviderError>;

    /// Provider name for logging.
    fn provider_name(&self) -> &'static str;
}

fn system_prompt() -> &'static str {
    "You are a photo analysis assistant. You examine photographs and return \
     structured metadata as JSON. Respond with JSON only, no surrounding prose."
}

fn base_analysis_prompt() -> &'static str {
    r#"Analyze this photo and return a JSON object with these fields:
{
  "caption": "<one-line caption>",
  "description": "<2-3 sentence description of subject, setting, lighting, and mood>",
  "keywords": ["<keyword>", ...],
  "classification": {"type": "<category>", "confidence": <0-1>, "explanation": "<why>"},
  "poiAnalysis": {<landmark or point-of-interest details, or omit>},
  "collectibleInsights": {<collectible/antique details, or omit>}
}
Omit poiAnalysis and collectibleInsights when they do not apply.
Return ONLY the JSON, no other text."#
}

/// Load an image, resize if either dimension exceeds the detail hint's bound,
/// re-encode as JPEG, and return the base64-encoded string with MIME type.
fn load_and_encode_image(
    image_path: &Path,
    max_dimension: u32,
) -> Result<(String, &'static str), ProviderError> {
    let img = image::open(image_path)
        .map_err(|e| ProviderError::Image(format!("{}: {}", image_path.display(), e)))?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    img.write_with_encoder(encoder)
        .map_err(|e| ProviderError::Image(format!("JPEG encode failed: {}", e)))?;

    let base64_image = BASE64.encode(buf.into_inner());
    Ok((base64_image, "image/jpeg"))
}

// ============================================================================
// OpenAI-compatible provider (works with LM Studio, OpenAI, and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: OpenAIContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            timeout,
        }
    }
}

impl VisionProvider for OpenAICompatibleProvider {
    fn analyze(&self, image_path: &Path, request: &AnalysisRequest) -> Result<String, ProviderError> {
        let (base64_image, mime_type) = load_and_encode_image(image_path, request.detail.max_dimension())?;
        let data_url = format!("data:{};base64,{}", mime_type, base64_image);

        let body = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: OpenAIContent::Text(request.system_prompt.clone()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: OpenAIContent::Parts(vec![
                        OpenAIContentPart::Text {
                            text: request.user_prompt.clone(),
                        },
                        OpenAIContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: data_url,
                                detail: request.detail.as_str().to_string(),
                            },
                        },
                    ]),
                },
            ],
            max_tokens: 1000,
            temperature: 0.3,
        };

        let url = format!("{}/chat/completions", self.endpoint);

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let mut req = agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req.send_json(&body)?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::Malformed("no choices in response".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }
}

// ============================================================================
// Anthropic Claude provider
// ============================================================================

pub struct AnthropicProvider {
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(endpoint: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

impl VisionProvider for AnthropicProvider {
    fn analyze(&self, image_path: &Path, request: &AnalysisRequest) -> Result<String, ProviderError> {
        let (base64_image, media_type) = load_and_encode_image(image_path, request.detail.max_dimension())?;

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 1000,
            system: request.system_prompt.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: vec![
                    AnthropicContent::Image {
                        source: AnthropicImageSource {
                            source_type: "base64".to_string(),
                            media_type: media_type.to_string(),
                            data: base64_image,
                        },
                    },
                    AnthropicContent::Text {
                        text: request.user_prompt.clone(),
                    },
                ],
            }],
        };

        let url = format!("{}/v1/messages", self.endpoint);

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", "2023-06-01")
            .send_json(&body)?;

        let anthropic_response: AnthropicResponse = response
            .into_json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        anthropic_response
            .content
            .first()
            .and_then(|c| c.text.clone())
            .ok_or_else(|| ProviderError::Malformed("no text content in response".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "Anthropic Claude"
    }
}

// ============================================================================
// Ollama provider
// ============================================================================

pub struct OllamaProvider {
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

impl VisionProvider for OllamaProvider {
    fn analyze(&self, image_path: &Path, request: &AnalysisRequest) -> Result<String, ProviderError> {
        let (base64_image, _mime_type) = load_and_encode_image(image_path, request.detail.max_dimension())?;

        let body = OllamaRequest {
            model: self.model.clone(),
            system: request.system_prompt.clone(),
            prompt: request.user_prompt.clone(),
            images: vec![base64_image],
            stream: false,
        };

        let url = format!("{}/api/generate", self.endpoint);

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&body)?;

        let ollama_response: OllamaResponse = response
            .into_json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(ollama_response.response)
    }

    fn provider_name(&self) -> &'static str {
        "Ollama"
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Conventional base URL for a dialect, used when the binding sets none.
fn default_endpoint(dialect: ProviderDialect) -> &'static str {
    match dialect {
        ProviderDialect::LmStudio => "http://127.0.0.1:1234/v1",
        ProviderDialect::OpenAI => "https://api.openai.com/v1",
        ProviderDialect::Anthropic => "https://api.anthropic.com",
        ProviderDialect::Ollama => "http://localhost:11434",
    }
}

/// The configured endpoint wins; the dialect default is a fallback only.
fn resolve_endpoint(model: &ModelConfig) -> String {
    model
        .endpoint
        .clone()
        .unwrap_or_else(|| default_endpoint(model.provider).to_string())
}

/// Create a provider adapter for a configured model binding.
pub fn create_provider(model: &ModelConfig, timeout: Duration) -> Box<dyn VisionProvider> {
    let endpoint = resolve_endpoint(model);
    match model.provider {
        ProviderDialect::LmStudio | ProviderDialect::OpenAI => Box::new(
            OpenAICompatibleProvider::new(&endpoint, &model.id, model.api_key.as_deref(), timeout),
        ),
        ProviderDialect::Anthropic => Box::new(AnthropicProvider::new(
            &endpoint,
            model.api_key.as_deref().unwrap_or(""),
            &model.id,
            timeout,
        )),
        ProviderDialect::Ollama => Box::new(OllamaProvider::new(&endpoint, &model.id, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config_prepends_context() {
        let config = AnalysisConfig {
            custom_prompt: Some("family vacation archive".to_string()),
            ..Default::default()
        };
        let request = AnalysisRequest::from_config(&config);
        assert!(request.user_prompt.starts_with("Context: family vacation archive"));
        assert!(request.user_prompt.contains("\"caption\""));
    }

    fn binding(provider: ProviderDialect, endpoint: Option<&str>) -> ModelConfig {
        ModelConfig {
            id: "m".to_string(),
            provider,
            endpoint: endpoint.map(|s| s.to_string()),
            api_key: None,
        }
    }

    #[test]
    fn test_endpoint_falls_back_per_dialect() {
        for (dialect, expected) in [
            (ProviderDialect::LmStudio, "http://127.0.0.1:1234/v1"),
            (ProviderDialect::OpenAI, "https://api.openai.com/v1"),
            (ProviderDialect::Anthropic, "https://api.anthropic.com"),
            (ProviderDialect::Ollama, "http://localhost:11434"),
        ] {
            assert_eq!(resolve_endpoint(&binding(dialect, None)), expected);
        }
    }

    #[test]
    fn test_configured_endpoint_overrides_dialect_default() {
        let model = binding(ProviderDialect::OpenAI, Some("https://llm-proxy.internal/v1"));
        assert_eq!(resolve_endpoint(&model), "https://llm-proxy.internal/v1");
    }

    #[test]
    fn test_detail_hint_bounds_dimension() {
        assert_eq!(DetailHint::Low.max_dimension(), 512);
        assert_eq!(DetailHint::Auto.max_dimension(), 1024);
        assert_eq!(DetailHint::High.max_dimension(), 2048);
    }
}
