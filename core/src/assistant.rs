use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-5";

/// Framing sent ahead of every conversation with the recipe assistant.
pub const SYSTEM_PROMPT: &str = "\
You are a recipe assistant for a personal recipe box backed by SQLite.
Tables: `recipe` (id, title, description, instructions, notes, image_url, menu, section, tags),
`ingredient` (id, name, grocery_category, notes, kitchen_staple) and
`recipe_ingredient` (recipe_id, ingredient_id, position, amount, unit, note).
Ingredient lines are written as `<amount> <unit> <name>`, one per line.
Help generate new recipes, adapt existing ones and answer questions about the collection.
When asked to write a recipe, give the title, tags and ingredient lines in that format.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// System prompt, then prior turns (any system turns in `history` are dropped), then the new message.
#[must_use]
pub fn build_transcript(history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
    let mut transcript = Vec::with_capacity(history.len() + 2);
    transcript.push(ChatMessage::system(SYSTEM_PROMPT));
    transcript.extend(
        history
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .cloned(),
    );
    transcript.push(ChatMessage::user(message));
    transcript
}

// --- OpenAI-compatible wire types ---

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Text of the first choice. A response without choices is an error.
pub fn extract_reply(response: ChatCompletionResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .context("Assistant returned no choices")?;
    Ok(choice.message.content.unwrap_or_default())
}
