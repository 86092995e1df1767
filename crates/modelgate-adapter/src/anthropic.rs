use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use modelgate_core::adapter::{StreamObservation, UpstreamPayload};
use modelgate_core::headers::{Headers, header_set};
use modelgate_core::{Adapter, RelayError, RelayInfo};
use modelgate_protocol::{SseEvent, Usage, messages};

use crate::util::{join_url, remap_model_in_body};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages-dialect provider family.
pub struct AnthropicAdapter;

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn validate(&self, _info: &RelayInfo, body: &Value) -> Result<(), RelayError> {
        let messages = body.get("messages").and_then(Value::as_array);
        if messages.is_none_or(|m| m.is_empty()) {
            return Err(RelayError::invalid_request("messages must not be empty"));
        }
        let max_tokens = body.get("max_tokens").and_then(Value::as_u64);
        if max_tokens.is_none_or(|v| v == 0) {
            return Err(RelayError::invalid_request("max_tokens must be positive"));
        }
        Ok(())
    }

    fn build_url(&self, info: &RelayInfo) -> Result<String, RelayError> {
        let channel = info
            .channel()
            .ok_or_else(|| RelayError::invalid_request("no channel bound to request"))?;
        Ok(join_url(&channel.base_url, "v1/messages"))
    }

    fn build_headers(&self, info: &RelayInfo) -> Headers {
        let mut headers = Vec::new();
        if let Some(channel) = info.channel() {
            header_set(&mut headers, "x-api-key", channel.key.clone());
        }
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
        header_set(&mut headers, "accept", "application/json");
        // Beta opt-ins are forwarded verbatim when the client sent one.
        if let Some(beta) = info
            .client_headers
            .get("anthropic-beta")
            .and_then(|v| v.to_str().ok())
        {
            header_set(&mut headers, "anthropic-beta", beta);
        }
        headers
    }

    fn build_body(&self, info: &RelayInfo) -> Result<UpstreamPayload, RelayError> {
        let bytes = remap_model_in_body(&info.body, &info.origin_model, &info.upstream_model)?;
        Ok(UpstreamPayload::json(bytes))
    }

    fn handle_response(&self, _info: &RelayInfo, body: &Bytes) -> Result<Usage, RelayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::bad_response_body(err.to_string()))?;
        let empty = value
            .get("content")
            .and_then(Value::as_array)
            .is_none_or(|content| content.is_empty());
        if empty {
            return Err(RelayError::empty_response());
        }
        Ok(messages::usage_from_value(&value).unwrap_or_default())
    }

    fn observe_frame(&self, event: &SseEvent, observation: &mut StreamObservation) {
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            return;
        };
        if let Some(usage) = messages::usage_from_value(&value) {
            observation.merge_usage(usage);
        }
        if let Some(text) = messages::delta_text_from_value(&value) {
            observation.completion_text.push_str(text);
        }
        if value.get("type").and_then(Value::as_str) == Some("message_stop") {
            observation.saw_done = true;
        }
    }
}
