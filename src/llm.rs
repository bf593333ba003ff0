use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{env_or, GenerationConfig};
use crate::error::GenerationError;

/// One request to the generative service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_instruction: String,
    /// Ordered user content parts.
    pub parts: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// JSON schema for structured output, when requested.
    pub response_schema: Option<serde_json::Value>,
}

/// Anything that turns a request into model text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Client for a Gemini-style `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
        let model =
            dotenv::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let api_key = dotenv::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        // The per-attempt timeout is enforced by `generate_with_retry`; this one
        // only guards against a hung connection.
        let ceiling: u64 = env_or("GENERATION_ATTEMPT_TIMEOUT_SECS", 30u64)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ceiling.saturating_mul(2).max(1)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with(":generateContent") {
            base.to_string()
        } else {
            format!("{}/models/{}:generateContent", base, self.model)
        }
    }

    fn body(request: &GenerationRequest) -> serde_json::Value {
        let parts: Vec<serde_json::Value> = request
            .parts
            .iter()
            .map(|p| serde_json::json!({ "text": p }))
            .collect();

        let mut generation_config = serde_json::json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = "application/json".into();
            generation_config["responseSchema"] = schema.clone();
        }

        serde_json::json!({
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a response body.
pub fn extract_candidate_text(json: &serde_json::Value) -> Option<String> {
    json["candidates"]
        .get(0)
        .and_then(|c| c["content"]["parts"].get(0))
        .and_then(|p| p["text"].as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut req = self.client.post(self.endpoint()).json(&Self::body(request));
        if let Some(key) = &self.api_key {
            req = req.header("x-goog-api-key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: text.chars().take(300).collect(),
            });
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))?;

        extract_candidate_text(&json).ok_or(GenerationError::EmptyText)
    }
}

/// Call the generator with a per-attempt timeout and linear backoff between
/// retryable failures. Attempts never overlap.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    config: &GenerationConfig,
) -> Result<String, GenerationError> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(config.attempt_timeout, generator.generate(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(config.attempt_timeout)),
        };

        match outcome {
            Ok(text) => {
                debug!(attempt, text_len = text.len(), "model call succeeded");
                return Ok(text);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = config.backoff_step * attempt;
                warn!(attempt, max_attempts, backoff_ms = backoff.as_millis() as u64, error = %e, "model call failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "model call failed, giving up");
                return Err(e);
            }
        }
    }
}
