use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use modelgate_core::adapter::{StreamObservation, UpstreamPayload};
use modelgate_core::headers::{Headers, header_set};
use modelgate_core::{Adapter, RelayError, RelayInfo};
use modelgate_protocol::{SseEvent, Usage, gemini};

use crate::util::join_url;

/// Gemini generate-content provider family. The model rides in the URL;
/// bodies pass through untouched.
pub struct GeminiAdapter;

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn validate(&self, info: &RelayInfo, body: &Value) -> Result<(), RelayError> {
        if info.action.as_deref() == Some("embedContent") {
            if body.get("content").is_none() && body.get("requests").is_none() {
                return Err(RelayError::invalid_request("content is required"));
            }
            return Ok(());
        }
        let contents = body.get("contents").and_then(Value::as_array);
        if contents.is_none_or(|c| c.is_empty()) {
            return Err(RelayError::invalid_request("contents must not be empty"));
        }
        Ok(())
    }

    fn build_url(&self, info: &RelayInfo) -> Result<String, RelayError> {
        let channel = info
            .channel()
            .ok_or_else(|| RelayError::invalid_request("no channel bound to request"))?;
        let verb = info.action.as_deref().unwrap_or("generateContent");
        let mut url = join_url(
            &channel.base_url,
            &format!("v1beta/models/{}:{verb}", info.upstream_model),
        );
        if verb == "streamGenerateContent" {
            // SSE framing keeps the pump's passthrough shape uniform.
            url.push_str("?alt=sse");
        }
        Ok(url)
    }

    fn build_headers(&self, info: &RelayInfo) -> Headers {
        let mut headers = Vec::new();
        if let Some(channel) = info.channel() {
            header_set(&mut headers, "x-goog-api-key", channel.key.clone());
        }
        header_set(&mut headers, "accept", "application/json");
        headers
    }

    fn build_body(&self, info: &RelayInfo) -> Result<UpstreamPayload, RelayError> {
        Ok(UpstreamPayload::json(info.body.clone()))
    }

    fn handle_response(&self, info: &RelayInfo, body: &Bytes) -> Result<Usage, RelayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::bad_response_body(err.to_string()))?;
        if info.action.as_deref() != Some("embedContent") {
            let empty = value
                .get("candidates")
                .and_then(Value::as_array)
                .is_none_or(|c| c.is_empty());
            if empty {
                return Err(RelayError::empty_response());
            }
        }
        Ok(gemini::usage_from_value(&value).unwrap_or_default())
    }

    fn observe_frame(&self, event: &SseEvent, observation: &mut StreamObservation) {
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            return;
        };
        if let Some(usage) = gemini::usage_from_value(&value) {
            observation.merge_usage(usage);
        }
        if let Some(text) = gemini::delta_text_from_value(&value) {
            observation.completion_text.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use modelgate_core::channel::ChannelSettings;
    use modelgate_core::{Channel, PriceData, RelayFormat};
    use modelgate_storage::ChannelStatus;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn info(action: &str, remap: Option<(&str, &str)>) -> RelayInfo {
        let mut settings = ChannelSettings::default();
        if let Some((from, to)) = remap {
            settings.model_mapping = HashMap::from([(from.to_string(), to.to_string())]);
        }
        let channel = Channel {
            id: 1,
            channel_type: "gemini".to_string(),
            name: "c1".to_string(),
            base_url: "https://generativelanguage.example".to_string(),
            key: "secret".to_string(),
            models: vec!["gemini-2.0-flash".to_string()],
            groups: vec!["default".to_string()],
            status: ChannelStatus::Enabled,
            priority: 1,
            fallback_channel_id: None,
            settings,
            auto_ban: false,
        };
        let mut info = RelayInfo {
            trace_id: "t".to_string(),
            request_id: None,
            format: RelayFormat::GenerateContent,
            user_id: 1,
            token_id: 1,
            token_name: "tok".to_string(),
            group: "default".to_string(),
            origin_model: "gemini-2.0-flash".to_string(),
            upstream_model: "gemini-2.0-flash".to_string(),
            channel: None,
            pinned: None,
            price: PriceData::default(),
            estimated_prompt_tokens: 0,
            final_pre_consumed: 0,
            attempt: 0,
            use_channel: Vec::new(),
            body: Bytes::from_static(br#"{"contents":[{"parts":[{"text":"x"}]}]}"#),
            is_stream: action == "streamGenerateContent",
            combined_text: None,
            output_cap: None,
            client_headers: HeaderMap::new(),
            action: Some(action.to_string()),
            task_id: None,
        };
        info.record_attempt(Arc::new(channel));
        info
    }

    #[test]
    fn stream_url_requests_sse_framing() {
        let adapter = GeminiAdapter;
        let url = adapter.build_url(&info("streamGenerateContent", None)).unwrap();
        assert_eq!(
            url,
            "https://generativelanguage.example/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn remapped_model_lands_in_the_url() {
        let adapter = GeminiAdapter;
        let url = adapter
            .build_url(&info(
                "generateContent",
                Some(("gemini-2.0-flash", "gemini-2.0-flash-001")),
            ))
            .unwrap();
        assert!(url.contains("gemini-2.0-flash-001:generateContent"));
    }

    #[test]
    fn body_is_forwarded_untouched() {
        let adapter = GeminiAdapter;
        let info = info("generateContent", Some(("gemini-2.0-flash", "other")));
        let payload = adapter.build_body(&info).unwrap();
        assert_eq!(payload.bytes, info.body);
    }

    #[test]
    fn missing_candidates_is_empty_response() {
        let adapter = GeminiAdapter;
        let err = adapter
            .handle_response(
                &info("generateContent", None),
                &Bytes::from_static(br#"{"candidates":[]}"#),
            )
            .unwrap_err();
        assert_eq!(err.kind().code(), "empty_response");
    }
}
