use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use majordome_core::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport failure: {0}")]
    Transport(String),
    #[error("llm returned a malformed payload: {0}")]
    Malformed(String),
}

/// Pluggable completion seam. Production uses [`HttpLlmClient`]; tests
/// script the replies.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, LlmError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(
            &json!({
                "model": self.model,
                "temperature": 0,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
            }),
        );
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!(
                "completion endpoint returned {}",
                response.status()
            )));
        }

        let payload: CompletionResponse =
            response.json().await.map_err(|error| LlmError::Malformed(error.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::Malformed("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use majordome_core::config::LlmConfig;

    use super::HttpLlmClient;

    #[test]
    fn base_url_is_normalised_without_trailing_slash() {
        let client = HttpLlmClient::from_config(&LlmConfig {
            api_key: None,
            base_url: "http://localhost:11434/v1/".to_string(),
            model: "llama3.1".to_string(),
            timeout_secs: 30,
        });
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }
}
