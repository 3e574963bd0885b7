use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, LlmProviderType};

/// A multimodal model that can answer a prompt about one image.
pub trait LlmProvider: Send + Sync {
    /// Send `prompt` together with the raw image bytes and return the text answer.
    fn analyze_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String>;

    /// Short name used in logs.
    fn provider_name(&self) -> &'static str;
}

fn build_agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Describe a failed request without echoing the request URL.
fn describe_request_error(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            format!("status code {} ({})", code, response.status_text())
        }
        ureq::Error::Transport(transport) => match transport.message() {
            Some(message) => format!("{}: {}", transport.kind(), message),
            None => transport.kind().to_string(),
        },
    }
}

// ============================================================================
// Gemini (generativelanguage generateContent API)
// ============================================================================

pub struct GeminiProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiBlob },
}

#[derive(Debug, Serialize)]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl LlmProvider for GeminiProvider {
    fn analyze_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("No API key configured for Gemini"))?;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: prompt.to_string(),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiBlob {
                            mime_type: mime_type.to_string(),
                            data: BASE64.encode(image),
                        },
                    },
                ],
            }],
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = build_agent(self.timeout_secs)
            .post(&url)
            .set("x-goog-api-key", api_key)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| anyhow!("Gemini request failed: {}", describe_request_error(e)))?;

        let body: GeminiResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Gemini response: {}", e))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| anyhow!("No candidates in Gemini response"))?;

        if text.trim().is_empty() {
            return Err(anyhow!("Gemini returned an empty response"));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "Gemini"
    }
}

// ============================================================================
// OpenAI-compatible provider (OpenAI, LM Studio and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

/// Upper bound on the answer length requested from chat backends.
const CHAT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: [ChatPart<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: DataUrl },
}

#[derive(Debug, Serialize)]
struct DataUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl LlmProvider for OpenAICompatibleProvider {
    fn analyze_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: [
                    ChatPart::Text { text: prompt },
                    ChatPart::ImageUrl {
                        image_url: DataUrl {
                            url: format!("data:{};base64,{}", mime_type, BASE64.encode(image)),
                        },
                    },
                ],
            }],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: 0.2,
        };

        let mut call = build_agent(self.timeout_secs)
            .post(&format!("{}/chat/completions", self.endpoint))
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            call = call.set("Authorization", &format!("Bearer {}", key));
        }

        let reply: ChatResponse = call
            .send_json(&request)
            .map_err(|e| anyhow!("Chat completion request failed: {}", describe_request_error(e)))?
            .into_json()
            .map_err(|e| anyhow!("Failed to parse chat completion: {}", e))?;

        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(anyhow!("Chat completion returned no content"));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }
}

/// Build the configured provider. A missing key is reported per call.
pub fn create_provider(config: &LlmConfig) -> Box<dyn LlmProvider> {
    match config.provider {
        LlmProviderType::Gemini => Box::new(
            GeminiProvider::new(&config.endpoint, &config.model, config.api_key.as_deref())
                .with_timeout(config.timeout_secs),
        ),
        LlmProviderType::OpenAI => Box::new(
            OpenAICompatibleProvider::new(
                &config.endpoint,
                &config.model,
                config.api_key.as_deref(),
            )
            .with_timeout(config.timeout_secs),
        ),
    }
}
