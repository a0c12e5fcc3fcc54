use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_request_error, classify_status, prompt, TranslationBackend};
use crate::config::TranslateConfig;
use crate::error::{BackendError, JimakuError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self { role: role.to_string(), content }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Read the API key from the named environment variable
pub fn api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(JimakuError::Config(format!(
            "API key not found: set the {} environment variable",
            env_var
        ))),
    }
}

/// OpenAI-compatible `/v1/chat/completions`
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    source_language: String,
    target_language: String,
}

impl OpenAiBackend {
    pub fn new(config: &TranslateConfig) -> Result<Self> {
        Self::with_key(config, api_key(&config.api_key_env)?)
    }

    pub fn with_key(config: &TranslateConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
        })
    }

    async fn complete(&self, system: String, user: String) -> std::result::Result<String, BackendError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", user)],
            temperature: 0.2,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        debug!("Sending chat completion request to: {}", url);

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| BackendError::Transient(format!("Failed to parse response: {}", e)))?;

        let choice = completion.choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Transient("Response has no choices".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(BackendError::Fatal("Content flagged by the model's content filter".to_string()));
        }

        prompt::extract_translation(&choice.message.content)
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    async fn translate(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError> {
        self.complete(
            prompt::system_instructions(&self.source_language, &self.target_language),
            prompt::build_user_prompt(text, context),
        )
        .await
    }

    async fn correct(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError> {
        self.complete(
            prompt::correction_instructions(&self.source_language),
            prompt::build_correction_user_prompt(text, context),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::test_server;
    use serde_json::json;

    fn backend(endpoint: String) -> OpenAiBackend {
        let config = TranslateConfig { endpoint, model: "gpt-4.1-mini".to_string(), ..TranslateConfig::default() };
        OpenAiBackend::with_key(&config, "sk-test".to_string()).unwrap()
    }

    fn completion(content: &str, finish_reason: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_chat_completion_reply() {
        let endpoint = test_server::serve(vec![(200, completion("{\"text\": \"Good evening\"}", "stop"))]).await;
        let translation = backend(endpoint).translate("こんばんは", &["前".to_string()]).await.unwrap();
        assert_eq!(translation, "Good evening");
    }

    #[tokio::test]
    async fn test_correction_reply() {
        let endpoint = test_server::serve(vec![(200, completion("{\"text\": \"お疲れ様です。\"}", "stop"))]).await;
        let corrected = backend(endpoint).correct("お疲れさまです", &[]).await.unwrap();
        assert_eq!(corrected, "お疲れ様です。");
    }

    #[tokio::test]
    async fn test_content_filter_is_fatal() {
        let endpoint = test_server::serve(vec![(200, completion("", "content_filter"))]).await;
        let err = backend(endpoint).translate("テスト", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_empty_choices_is_transient() {
        let endpoint = test_server::serve(vec![(200, json!({"choices": []}).to_string())]).await;
        let err = backend(endpoint).translate("テスト", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = api_key("JIMAKU_TEST_UNSET_KEY_VARIABLE").unwrap_err();
        assert!(matches!(err, JimakuError::Config(_)));
    }
}
