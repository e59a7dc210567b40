//! LLM Backends
//!
//! Gemini is the primary generator and Ollama the local fallback. Both sit
//! behind [`LlmBackend`]. A missing key or a disabled flag makes `from_config`
//! return `Ok(None)`.

use crate::config::{GeminiConfig, OllamaConfig};
use crate::error::{CareQueryError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Prompt-in, text-out language model backend
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// One-shot completion. Transport failures, timeouts, HTTP errors and
    /// empty answers are all errors.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Sampling parameters shared by both backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| CareQueryError::Llm(format!("Failed to create HTTP client: {}", e)))
}

/// Bounds the whole request, including body download
async fn with_timeout<T>(
    backend: &str,
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        CareQueryError::Llm(format!("{} call timed out after {:?}", backend, timeout))
    })?
}

/// Google Generative Language REST client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    params: GenerationParams,
    timeout: Duration,
}

impl GeminiClient {
    /// Returns `Ok(None)` when no API key is configured
    pub fn from_config(config: &GeminiConfig) -> Result<Option<Self>> {
        let api_key = match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                warn!("No Gemini API key configured, primary LLM disabled");
                return Ok(None);
            }
        };
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Ok(Some(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            params: GenerationParams {
                temperature: config.temperature,
                max_tokens: config.max_output_tokens,
                top_p: Some(config.top_p),
                top_k: Some(config.top_k),
            },
            timeout,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.params.temperature,
                "maxOutputTokens": self.params.max_tokens,
                "topP": self.params.top_p,
                "topK": self.params.top_k,
            }
        })
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| CareQueryError::Llm(format!("Gemini API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CareQueryError::Llm(format!(
                "Gemini API error ({}): {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CareQueryError::Llm(format!("Failed to parse Gemini response: {}", e)))?;

        parse_gemini_text(&response_json)
    }
}

/// Concatenates the text parts of the first candidate
pub fn parse_gemini_text(response: &serde_json::Value) -> Result<String> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| CareQueryError::Llm("No content in Gemini response".to_string()))?;

    let text = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(CareQueryError::Llm("Gemini returned an empty answer".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl LlmBackend for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Calling Gemini model {} ({} prompt chars)", self.model, prompt.len());
        with_timeout("Gemini", self.timeout, self.call(prompt)).await
    }
}

/// Local Ollama `/api/generate` client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    params: GenerationParams,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    /// Returns `Ok(None)` when the fallback is disabled or has no model
    pub fn from_config(config: &OllamaConfig) -> Result<Option<Self>> {
        if !config.enabled || config.model.trim().is_empty() {
            warn!("Ollama fallback disabled");
            return Ok(None);
        }
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Ok(Some(Self {
            client: build_http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            params: GenerationParams {
                temperature: config.temperature,
                max_tokens: config.num_predict,
                top_p: None,
                top_k: None,
            },
            timeout,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.params.temperature,
                "num_predict": self.params.max_tokens,
            }
        });

        let response = self
            .client
            .post(&format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CareQueryError::Llm(format!("Ollama API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CareQueryError::Llm(format!(
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| CareQueryError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        if parsed.response.trim().is_empty() {
            return Err(CareQueryError::Llm("Ollama returned an empty answer".to_string()));
        }
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Calling Ollama model {} ({} prompt chars)", self.model, prompt.len());
        with_timeout("Ollama", self.timeout, self.call(prompt)).await
    }
}
