//! Response normalization
//!
//! Upstream providers disagree on where a choice's text lives. Every choice
//! is decoded into a [`ChoiceShape`] and re-emitted in the canonical
//! OpenAI envelope: `delta` for stream chunks, `message` for whole bodies.
//! Missing envelope fields are backfilled; anything else is left untouched.

pub mod stream;

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub use stream::StreamNormalizer;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const COMPLETION_OBJECT: &str = "chat.completion";

/// Values used for envelope fields the upstream left out.
///
/// One instance lives for a whole exchange so every chunk of a stream gets
/// the same generated id.
#[derive(Debug, Clone)]
pub struct EnvelopeDefaults {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl EnvelopeDefaults {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: Utc::now().timestamp(),
            model: model.into(),
        }
    }
}

/// Where a vendor put the text of one choice
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceShape {
    /// `{"delta": {...}}`, the canonical streaming form
    Delta(Map<String, Value>),
    /// `{"message": {...}}`, the canonical non-streaming form
    Message(Map<String, Value>),
    /// `{"text": ...}` or `{"content": ...}` directly on the choice
    Flat(Value),
    /// Nothing recognizable
    Empty,
}

impl ChoiceShape {
    /// Decode a choice, removing the fields that carried its text.
    pub fn take_from(choice: &mut Map<String, Value>) -> Self {
        if let Some(Value::Object(delta)) = choice.remove("delta") {
            // a stray `message` next to a delta is redundant
            choice.remove("message");
            return ChoiceShape::Delta(delta);
        }
        if let Some(Value::Object(message)) = choice.remove("message") {
            return ChoiceShape::Message(message);
        }
        if let Some(text) = choice.remove("text") {
            choice.remove("content");
            return ChoiceShape::Flat(text);
        }
        if let Some(content) = choice.remove("content") {
            return ChoiceShape::Flat(content);
        }
        ChoiceShape::Empty
    }

    /// The role/content object, with `role` defaulted to `assistant`
    pub fn into_body(self) -> Map<String, Value> {
        let mut body = match self {
            ChoiceShape::Delta(map) | ChoiceShape::Message(map) => map,
            ChoiceShape::Flat(content) => {
                let mut map = Map::new();
                map.insert("content".to_string(), content);
                map
            }
            ChoiceShape::Empty => {
                let mut map = Map::new();
                map.insert("content".to_string(), Value::String(String::new()));
                map
            }
        };
        body.entry("role")
            .or_insert_with(|| Value::String("assistant".to_string()));
        body
    }
}

/// Normalize one stream chunk into the canonical chunk envelope
pub fn normalize_chunk(value: Value, defaults: &EnvelopeDefaults) -> Value {
    normalize_envelope(value, defaults, CHUNK_OBJECT, "delta")
}

/// Normalize a whole non-streaming body into the canonical completion envelope
pub fn normalize_body(value: Value, defaults: &EnvelopeDefaults) -> Value {
    normalize_envelope(value, defaults, COMPLETION_OBJECT, "message")
}

fn normalize_envelope(
    value: Value,
    defaults: &EnvelopeDefaults,
    object: &str,
    body_key: &str,
) -> Value {
    let Value::Object(mut envelope) = value else {
        return value;
    };

    backfill(&mut envelope, "id", || Value::String(defaults.id.clone()));
    backfill(&mut envelope, "object", || Value::String(object.to_string()));
    backfill(&mut envelope, "created", || json!(defaults.created));
    backfill(&mut envelope, "model", || Value::String(defaults.model.clone()));

    if !envelope.contains_key("choices") {
        if let Some(response) = envelope.remove("response") {
            let content = match response {
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            };
            envelope.insert(
                "choices".to_string(),
                json!([{
                    "index": 0,
                    body_key: {"role": "assistant", "content": content},
                    "finish_reason": "stop",
                }]),
            );
            return Value::Object(envelope);
        }
    }

    if let Some(Value::Array(choices)) = envelope.get_mut("choices") {
        for (position, choice) in choices.iter_mut().enumerate() {
            if let Value::Object(map) = choice {
                normalize_choice(map, position, body_key);
            }
        }
    }

    Value::Object(envelope)
}

fn normalize_choice(choice: &mut Map<String, Value>, position: usize, body_key: &str) {
    let shape = ChoiceShape::take_from(choice);
    choice.insert(body_key.to_string(), Value::Object(shape.into_body()));
    backfill(choice, "index", || json!(position));
    backfill(choice, "finish_reason", || Value::Null);
}

fn backfill(map: &mut Map<String, Value>, key: &str, default: impl FnOnce() -> Value) {
    match map.get(key) {
        Some(v) if !v.is_null() => {}
        _ => {
            map.insert(key.to_string(), default());
        }
    }
}

/// Text of the first choice of a normalized chunk or body.
///
/// Content-part arrays contribute their `text` parts.
pub fn choice_text(normalized: &Value, body_key: &str) -> String {
    let Some(choices) = normalized.get("choices").and_then(Value::as_array) else {
        return String::new();
    };
    choices
        .iter()
        .find(|c| c.get("index").and_then(Value::as_u64).unwrap_or(0) == 0)
        .and_then(|c| c.get(body_key))
        .and_then(|body| body.get("content"))
        .map(content_text)
        .unwrap_or_default()
}

/// Flatten a `content` value to plain text
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(p) => p.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect(),
        _ => String::new(),
    }
}

/// Completion text of a whole non-streaming body (any vendor shape)
pub fn completion_text(body: &Value, defaults: &EnvelopeDefaults) -> String {
    choice_text(&normalize_body(body.clone(), defaults), "message")
}
