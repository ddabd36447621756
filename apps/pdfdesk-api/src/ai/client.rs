//! OpenAI-compatible chat completions client (OpenAI, OpenRouter)

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{AiError, AiProvider, ChatMessage, ChatModel, Completion, CompletionOptions};

pub fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    provider: AiProvider,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: AiProvider,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| provider.default_model().to_string()),
        }
    }

    pub fn endpoint(&self) -> String {
        chat_completions_url(&self.base_url)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Pull `error.message` out of an error body, falling back to the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, AiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AiError::NotConfigured("AI_API_KEY is not set".to_string()))?;

        let body = ChatCompletionsRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body);

        if self.provider == AiProvider::Openrouter {
            request = request
                .header("HTTP-Referer", "https://pdfdesk.app")
                .header("X-Title", "pdfdesk");
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AiError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: ChatCompletionsResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyResponse)?;

        tracing::debug!(
            "Completion from {}: prompt_tokens={:?} completion_tokens={:?}",
            self.model,
            parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            parsed.usage.as_ref().and_then(|u| u.completion_tokens)
        );

        Ok(Completion {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_provider_defaults() {
        let client = OpenAiCompatibleClient::new(AiProvider::Openrouter, Some("k".into()), None, None);
        assert_eq!(client.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(client.model_name(), "openai/gpt-4o-mini");

        let client = OpenAiCompatibleClient::new(
            AiProvider::Openai,
            None,
            Some("gpt-4o".into()),
            Some("http://localhost:8080/v1".into()),
        );
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.model_name(), "gpt-4o");
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = OpenAiCompatibleClient::new(AiProvider::Openai, Some("  ".into()), None, None);
        let err = client
            .complete(&[ChatMessage::user("hi")], CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NotConfigured(_)));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"Hi"}}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, Some(1));
    }
}
