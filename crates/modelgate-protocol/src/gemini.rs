use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::usage::Usage;

/// Gemini generate-content request, decoded only as far as the relay needs.
/// The model is addressed in the URL path, not the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<Value>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerateContentRequest {
    pub fn output_cap(&self) -> Option<u32> {
        self.generation_config
            .as_ref()
            .and_then(|config| config.max_output_tokens)
    }

    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for content in &self.contents {
            let Some(parts) = content.get("parts").and_then(Value::as_array) else {
                continue;
            };
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        out
    }
}

/// Usage from `usageMetadata` on a generate-content response or stream frame.
/// Thought tokens bill as completion tokens.
pub fn usage_from_value(value: &Value) -> Option<Usage> {
    let meta = value.get("usageMetadata")?;
    let prompt = meta.get("promptTokenCount").and_then(Value::as_u64)?;
    let candidates = meta
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let thoughts = meta
        .get("thoughtsTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total = meta
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + candidates + thoughts);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: candidates + thoughts,
        total_tokens: total,
    })
}

pub fn delta_text_from_value(value: &Value) -> Option<&str> {
    value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thought_tokens_count_as_completion() {
        let frame = json!({"usageMetadata": {
            "promptTokenCount": 10,
            "candidatesTokenCount": 20,
            "thoughtsTokenCount": 5,
            "totalTokenCount": 35,
        }});
        let usage = usage_from_value(&frame).unwrap();
        assert_eq!(usage.completion_tokens, 25);
        assert_eq!(usage.total_tokens, 35);
    }

    #[test]
    fn combined_text_reads_parts() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "ping"}]}],
        }))
        .unwrap();
        assert_eq!(req.combined_text(), "ping");
    }
}
