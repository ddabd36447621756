//! AI summaries and document chat
//!
//! Inference runs on an OpenAI-compatible chat completions API. The
//! [`ChatModel`] trait is the seam between prompt building and transport.

pub mod client;
pub mod prompts;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::OpenAiCompatibleClient;
pub use prompts::{SummaryStyle, MAX_DOCUMENT_CHARS, MAX_HISTORY_MESSAGES};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider not configured: {0}")]
    NotConfigured(String),

    #[error("AI provider rate limited the request")]
    RateLimited,

    #[error("AI provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI provider returned no content")]
    EmptyResponse,
}

/// Hosted API speaking the OpenAI chat completions protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Openai,
    Openrouter,
}

impl AiProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            AiProvider::Openai => "https://api.openai.com/v1",
            AiProvider::Openrouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Openai => "gpt-4o-mini",
            AiProvider::Openrouter => "openai/gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Trait for chat completion backends
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, AiError>;

    /// Model identifier reported to clients
    fn model_name(&self) -> &str;
}

/// A generated summary
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub summary: String,
    pub style: SummaryStyle,
    /// The input was cut to fit the model context
    pub truncated: bool,
    pub model: String,
}

/// Summarize `text`. Callers reject empty text before getting here.
pub async fn summarize(
    model: &dyn ChatModel,
    text: &str,
    style: SummaryStyle,
) -> Result<Summary, AiError> {
    let (messages, truncated) = prompts::summary_messages(text, style);
    let options = CompletionOptions {
        max_tokens: style.max_tokens(),
        ..CompletionOptions::default()
    };

    let completion = model.complete(&messages, options).await?;

    Ok(Summary {
        summary: completion.content.trim().to_string(),
        style,
        truncated,
        model: completion.model,
    })
}

/// Answer `question` about a document given the earlier conversation
pub async fn answer(
    model: &dyn ChatModel,
    document_text: &str,
    history: &[ChatMessage],
    question: &str,
) -> Result<Completion, AiError> {
    let messages = prompts::chat_messages(document_text, history, question);
    let mut completion = model.complete(&messages, CompletionOptions::default()).await?;
    completion.content = completion.content.trim().to_string();
    Ok(completion)
}
