//! Prompt construction for summaries and document chat

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ChatMessage;

/// Longest document excerpt sent to the model, in characters
pub const MAX_DOCUMENT_CHARS: usize = 24_000;

/// Earlier chat turns included with each question
pub const MAX_HISTORY_MESSAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Brief,
    Detailed,
    Bullets,
}

impl SummaryStyle {
    fn instruction(&self) -> &'static str {
        match self {
            SummaryStyle::Brief => {
                "Summarize the document in one short paragraph of at most five sentences."
            }
            SummaryStyle::Detailed => {
                "Write a detailed summary of the document. Cover every major section, \
                 keep important figures, names and dates, and use several paragraphs."
            }
            SummaryStyle::Bullets => {
                "Summarize the document as a list of 5 to 10 concise bullet points, \
                 one line each, starting with \"- \"."
            }
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            SummaryStyle::Brief => 300,
            SummaryStyle::Detailed => 1200,
            SummaryStyle::Bullets => 600,
        }
    }
}

impl FromStr for SummaryStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brief" | "" => Ok(SummaryStyle::Brief),
            "detailed" => Ok(SummaryStyle::Detailed),
            "bullets" | "bullet" => Ok(SummaryStyle::Bullets),
            other => Err(format!(
                "Unknown summary style '{}'. Use brief, detailed or bullets",
                other
            )),
        }
    }
}

/// Cut `text` to at most `max_chars` characters. Returns whether it was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

const SUMMARY_SYSTEM_PROMPT: &str = "You are a precise assistant that summarizes documents. \
     Only use information found in the document. Answer in the document's language.";

pub fn summary_messages(text: &str, style: SummaryStyle) -> (Vec<ChatMessage>, bool) {
    let (excerpt, truncated) = truncate_chars(text.trim(), MAX_DOCUMENT_CHARS);

    let mut user = format!("{}\n\n<document>\n{}\n</document>", style.instruction(), excerpt);
    if truncated {
        user.push_str("\n\nThe document was cut off; summarize only the part shown.");
    }

    (
        vec![ChatMessage::system(SUMMARY_SYSTEM_PROMPT), ChatMessage::user(user)],
        truncated,
    )
}

/// System prompt with the document, the last turns of history, then the question
pub fn chat_messages(document_text: &str, history: &[ChatMessage], question: &str) -> Vec<ChatMessage> {
    let (excerpt, _) = truncate_chars(document_text.trim(), MAX_DOCUMENT_CHARS);

    let system = format!(
        "You answer questions about the document below. Base every answer on the document; \
         if it does not contain the answer, say so.\n\n<document>\n{}\n</document>",
        excerpt
    );

    let skip = history.len().saturating_sub(MAX_HISTORY_MESSAGES);

    let mut messages = Vec::with_capacity(2 + history.len() - skip);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().skip(skip).cloned());
    messages.push(ChatMessage::user(question.trim()));
    messages
}
