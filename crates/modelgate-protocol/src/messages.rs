use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::usage::Usage;

/// Anthropic messages request, decoded only as far as the relay needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagesRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        if let Some(system) = &self.system {
            append_text(&mut out, system);
        }
        for message in &self.messages {
            if let Some(content) = message.get("content") {
                append_text(&mut out, content);
            }
        }
        out
    }
}

fn append_text(out: &mut String, value: &Value) {
    match value {
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

/// Usage from a messages response or stream event.
///
/// `message_start` carries input tokens; `message_delta` carries the final
/// output count. Either shape nests usage one level down.
pub fn usage_from_value(value: &Value) -> Option<Usage> {
    let usage = value
        .get("usage")
        .or_else(|| value.get("message").and_then(|m| m.get("usage")))?;
    let input = usage.get("input_tokens").and_then(Value::as_u64);
    let output = usage.get("output_tokens").and_then(Value::as_u64);
    if input.is_none() && output.is_none() {
        return None;
    }
    let prompt = input.unwrap_or(0);
    let completion = output.unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

pub fn delta_text_from_value(value: &Value) -> Option<&str> {
    value.get("delta")?.get("text")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_from_message_start_and_delta() {
        let start = json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}});
        let usage = usage_from_value(&start).unwrap();
        assert_eq!(usage.prompt_tokens, 12);

        let delta = json!({"type": "message_delta", "usage": {"output_tokens": 40}});
        let usage = usage_from_value(&delta).unwrap();
        assert_eq!(usage.completion_tokens, 40);
    }

    #[test]
    fn combined_text_includes_system() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "m",
            "max_tokens": 16,
            "system": "be terse",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hello"}]}],
        }))
        .unwrap();
        assert_eq!(req.combined_text(), "be terse\nhello");
    }
}
