//! Inbound chat completion request
//!
//! The body is forwarded upstream byte for byte, so only the fields the
//! relay itself needs are decoded here.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Stand-in for content parts that carry no text (images, audio, files)
pub const ATTACHMENT_PLACEHOLDER: &str = "[attachment]";

/// Chat message as seen by accounting; `content` may be a string, a list of
/// content parts, or null
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl ChatMessage {
    /// Text of the message with non-text parts replaced by a placeholder
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .map(|part| match part {
                    Value::String(s) => s.clone(),
                    Value::Object(p) => match p.get("text").and_then(Value::as_str) {
                        Some(text) => text.to_string(),
                        None => ATTACHMENT_PLACEHOLDER.to_string(),
                    },
                    _ => ATTACHMENT_PLACEHOLDER.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RequestFields {
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    messages: Option<Vec<ChatMessage>>,
}

/// Decoded view of a chat completion request
#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
    /// Whole body as JSON, for the exchange log
    pub body: Value,
    /// Exact bytes received, forwarded upstream
    pub raw: Bytes,
}

impl ChatCompletionRequest {
    pub fn parse(raw: Bytes) -> AppResult<Self> {
        let body: Value = serde_json::from_slice(&raw)
            .map_err(|e| AppError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
        if !body.is_object() {
            return Err(AppError::BadRequest(
                "Request body must be a JSON object".to_string(),
            ));
        }

        let model = match body.get("model") {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            _ => {
                return Err(AppError::BadRequest(
                    "'model' is required and must be a string".to_string(),
                ))
            }
        };

        let fields = RequestFields::deserialize(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;

        Ok(Self {
            model,
            stream: fields.stream.unwrap_or(false),
            messages: fields.messages.unwrap_or_default(),
            body,
            raw,
        })
    }

    /// Concatenated text of every message, used for the prompt token count
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(ChatMessage::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text of the last user message; what the correlator matches on
    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(ChatMessage::text)
            .unwrap_or_default()
    }
}
