use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{classify_request_error, classify_status, prompt, TranslationBackend};
use crate::config::TranslateConfig;
use crate::error::{BackendError, JimakuError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Ollama `/api/generate` with JSON output
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
    source_language: String,
    target_language: String,
}

impl OllamaBackend {
    pub fn new(config: &TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
        })
    }

    async fn generate(&self, prompt_text: String) -> std::result::Result<String, BackendError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt_text,
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.endpoint);

        debug!("Sending generate request to: {}", url);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let generated: GenerateResponse = response.json().await
            .map_err(|e| BackendError::Transient(format!("Failed to parse response: {}", e)))?;

        debug!("Raw Ollama response: {}", generated.response);

        prompt::extract_translation(&generated.response)
    }
}

#[async_trait]
impl TranslationBackend for OllamaBackend {
    async fn translate(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError> {
        self.generate(prompt::build_translation_prompt(text, context, &self.source_language, &self.target_language))
            .await
    }

    async fn correct(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError> {
        self.generate(prompt::build_correction_prompt(text, context, &self.source_language)).await
    }
}

/// Check if Ollama is available and the model is loaded
pub async fn check_ollama_availability(endpoint: &str, model: &str) -> Result<()> {
    let client = Client::new();
    let url = format!("{}/api/show", endpoint.trim_end_matches('/'));

    let request = json!({
        "name": model
    });

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .map_err(|e| JimakuError::Translation(format!("Failed to connect to Ollama: {}", e)))?;

    if response.status().is_success() {
        info!("Ollama model '{}' is available", model);
        Ok(())
    } else {
        Err(JimakuError::Translation(format!(
            "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
            model, model
        )))
    }
}
