use crate::models::ChatMessage;
use crate::traits::LanguageModel;
use crate::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for OpenAI-compatible `/chat/completions` endpoints such as Groq.
pub struct ChatCompletionsModel {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl ChatCompletionsModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        temperature: f32,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            temperature,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::MissingCredential("GROQ_API_KEY must be set to ask questions".to_string())
        })?;

        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: messages
                .iter()
                .map(|message| RequestMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Response {
                provider: self.endpoint.clone(),
                details: format!("{status}: {text}"),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_content(parsed).ok_or_else(|| ProviderError::EmptyResponse(self.model.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{first_content, ChatCompletionsModel, ChatResponse};
    use crate::traits::LanguageModel;
    use crate::{ChatMessage, ProviderError};
    use std::time::Duration;

    #[test]
    fn response_content_is_trimmed() -> Result<(), Box<dyn std::error::Error>> {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  It is 42.\n"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body)?;
        assert_eq!(first_content(parsed).as_deref(), Some("It is 42."));
        Ok(())
    }

    #[test]
    fn blank_response_is_treated_as_missing() -> Result<(), Box<dyn std::error::Error>> {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"   "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body)?;
        assert!(first_content(parsed).is_none());
        Ok(())
    }

    #[test]
    fn endpoint_is_joined_without_double_slash() -> Result<(), Box<dyn std::error::Error>> {
        let model = ChatCompletionsModel::new(
            "https://api.groq.com/openai/v1/",
            "llama-3.1-8b-instant",
            0.3,
            None,
            Duration::from_secs(5),
        )?;
        assert_eq!(model.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
        Ok(())
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() -> Result<(), Box<dyn std::error::Error>> {
        let model = ChatCompletionsModel::new(
            "http://127.0.0.1:9",
            "llama-3.1-8b-instant",
            0.3,
            Some("  ".to_string()),
            Duration::from_secs(5),
        )?;
        let result = model.generate(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(ProviderError::MissingCredential(_))));
        Ok(())
    }
}
