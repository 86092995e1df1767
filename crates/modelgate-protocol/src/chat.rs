use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::usage::Usage;

/// OpenAI chat-completions request, decoded only as far as the relay needs.
/// Unrecognised fields round-trip through `extra` so the upstream body stays
/// bit-exact after a model remap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// The effective output-token cap used for pre-consume pricing.
    pub fn output_cap(&self) -> Option<u32> {
        match (self.max_completion_tokens, self.max_tokens) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Concatenated text view of the prompt, for token counting and
    /// sensitive-word scanning.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            append_content_text(&mut out, &message.content);
        }
        out
    }
}

fn append_content_text(out: &mut String, content: &Value) {
    match content {
        Value::String(text) => {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
        Value::Array(parts) => {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        _ => {}
    }
}

/// Pull usage out of a chat-completions response or stream frame.
pub fn usage_from_value(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    if usage.is_null() {
        return None;
    }
    let prompt = usage.get("prompt_tokens").and_then(Value::as_u64)?;
    let completion = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

/// Completion text deltas from a chat stream frame, for usage back-compute
/// when the upstream omits metadata.
pub fn delta_text_from_value(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_round_trip() {
        let body = json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7,
            "tools": [{"type": "function"}],
        });
        let req: ChatCompletionRequest = serde_json::from_value(body.clone()).unwrap();
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back.get("temperature"), body.get("temperature"));
        assert_eq!(back.get("tools"), body.get("tools"));
    }

    #[test]
    fn output_cap_prefers_larger_limit() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "max_tokens": 100,
            "max_completion_tokens": 400,
        }))
        .unwrap();
        assert_eq!(req.output_cap(), Some(400));
    }

    #[test]
    fn combined_text_walks_content_parts() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "user", "content": [{"type": "text", "text": "second"}]},
            ],
        }))
        .unwrap();
        assert_eq!(req.combined_text(), "first\nsecond");
    }

    #[test]
    fn usage_extraction() {
        let frame = json!({"usage": {"prompt_tokens": 3, "completion_tokens": 5}});
        let usage = usage_from_value(&frame).unwrap();
        assert_eq!(usage.total_tokens, 8);
        assert!(usage_from_value(&json!({"usage": null})).is_none());
    }
}
