//! Generation model providers.
//!
//! A [`GenerationModel`] takes a prompt plus zero or more page images and
//! returns text. It backs both metadata extraction (text only) and the final
//! answer (multimodal when grounding images are present).
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledModel`] | — |
//! | `"openai"` | [`OpenAIChat`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerate`] | `POST /api/generate` |
//! | `"gemini"` | [`GeminiModel`] | `POST /v1beta/models/{model}:generateContent` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::LlmConfig;
use crate::embedding::http_client;
use crate::models::GroundingImage;

#[async_trait]
pub trait GenerationModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str, images: &[GroundingImage]) -> Result<String>;
}

pub fn create_model(config: &LlmConfig) -> Result<Box<dyn GenerationModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "openai" => Ok(Box::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerate::new(config)?)),
        "gemini" => Ok(Box::new(GeminiModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn required_model(config: &LlmConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))
}

fn data_url(image: &GroundingImage) -> String {
    format!("data:{};base64,{}", image.mime_type, BASE64.encode(&image.bytes))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    label: &str,
) -> Result<serde_json::Value> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", label, status, body_text);
    }
    Ok(response.json().await?)
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl GenerationModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str, _images: &[GroundingImage]) -> Result<String> {
        bail!("Generation model is disabled. Set [llm] provider in config.")
    }
}

// ============ OpenAI ============

/// Chat completions with `image_url` content parts for grounding images.
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    model: String,
    url: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            temperature: config.temperature,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &str, images: &[GroundingImage]) -> serde_json::Value {
        let content = if images.is_empty() {
            serde_json::Value::String(prompt.to_string())
        } else {
            let mut parts = vec![serde_json::json!({"type": "text", "text": prompt})];
            parts.extend(images.iter().map(|image| {
                serde_json::json!({
                    "type": "image_url",
                    "image_url": {"url": data_url(image)}
                })
            }));
            serde_json::Value::Array(parts)
        };

        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": content}],
        })
    }
}

#[async_trait]
impl GenerationModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, images: &[GroundingImage]) -> Result<String> {
        let request = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key);
        let json = post_json(request, &self.request_body(prompt, images), "OpenAI").await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

/// Non-streaming `/api/generate`; images are sent as bare base64.
pub struct OllamaGenerate {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerate {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerationModel for OllamaGenerate {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, images: &[GroundingImage]) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        if !images.is_empty() {
            let encoded: Vec<String> = images.iter().map(|i| BASE64.encode(&i.bytes)).collect();
            body["images"] = serde_json::json!(encoded);
        }

        let request = self
            .client
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')));
        let json = post_json(request, &body, "Ollama").await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response"))
    }
}

// ============ Gemini ============

/// Google Generative Language API with `inline_data` image parts.
/// Requires `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
pub struct GeminiModel {
    model: String,
    url: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;
        let model = required_model(config)?;
        Ok(Self {
            // Accept both "gemini-1.5-pro" and "models/gemini-1.5-pro".
            model: model.trim_start_matches("models/").to_string(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            temperature: config.temperature,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerationModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, images: &[GroundingImage]) -> Result<String> {
        let mut parts = vec![serde_json::json!({"text": prompt})];
        parts.extend(images.iter().map(|image| {
            serde_json::json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": BASE64.encode(&image.bytes),
                }
            })
        }));
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {"temperature": self.temperature},
        });

        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.url.trim_end_matches('/'),
                self.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json(request, &body, "Gemini").await?;
        parse_gemini_text(&json)
    }
}

fn parse_gemini_text(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: no candidate parts"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        bail!("Gemini response contained no text");
    }
    Ok(text)
}
