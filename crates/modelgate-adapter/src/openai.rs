use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use modelgate_core::adapter::{StreamObservation, TaskInfo, UpstreamPayload};
use modelgate_core::headers::{Headers, header_set};
use modelgate_core::{Adapter, RelayError, RelayFormat, RelayInfo};
use modelgate_protocol::{SseEvent, Usage, chat};

use crate::util::{join_url, remap_model_in_body};

/// OpenAI-compatible provider family. One adapter serves every dialect an
/// OpenAI-style endpoint exposes; the request format picks the path.
pub struct OpenAiAdapter;

fn channel<'a>(info: &'a RelayInfo) -> Result<&'a modelgate_core::Channel, RelayError> {
    info.channel()
        .map(|ch| ch.as_ref())
        .ok_or_else(|| RelayError::invalid_request("no channel bound to request"))
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn validate(&self, info: &RelayInfo, body: &Value) -> Result<(), RelayError> {
        match info.format {
            RelayFormat::Chat => {
                let messages = body.get("messages").and_then(Value::as_array);
                if messages.is_none_or(|m| m.is_empty()) {
                    return Err(RelayError::invalid_request("messages must not be empty"));
                }
            }
            RelayFormat::Embeddings => {
                if body.get("input").is_none() {
                    return Err(RelayError::invalid_request("input is required"));
                }
            }
            RelayFormat::Rerank => {
                if body.get("query").is_none() || body.get("documents").is_none() {
                    return Err(RelayError::invalid_request(
                        "query and documents are required",
                    ));
                }
            }
            RelayFormat::Image | RelayFormat::Responses => {
                if body.is_null() {
                    return Err(RelayError::invalid_request("request body is required"));
                }
            }
            RelayFormat::Task => {
                if info.action.as_deref() != Some("fetch")
                    && body.get("prompt").is_none()
                    && !is_multipart(info)
                {
                    return Err(RelayError::invalid_request("field prompt is required"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn method(&self, info: &RelayInfo) -> http::Method {
        if info.format == RelayFormat::Task && info.action.as_deref() == Some("fetch") {
            http::Method::GET
        } else {
            http::Method::POST
        }
    }

    fn build_url(&self, info: &RelayInfo) -> Result<String, RelayError> {
        let channel = channel(info)?;
        let base = &channel.base_url;
        let url = match info.format {
            RelayFormat::Chat => join_url(base, "v1/chat/completions"),
            RelayFormat::Embeddings => join_url(base, "v1/embeddings"),
            RelayFormat::Rerank => join_url(base, "v1/rerank"),
            RelayFormat::Image => {
                if info.action.as_deref() == Some("edits") {
                    join_url(base, "v1/images/edits")
                } else {
                    join_url(base, "v1/images/generations")
                }
            }
            RelayFormat::Audio => match info.action.as_deref() {
                Some("transcriptions") => join_url(base, "v1/audio/transcriptions"),
                Some("translations") => join_url(base, "v1/audio/translations"),
                _ => join_url(base, "v1/audio/speech"),
            },
            RelayFormat::Responses => join_url(base, "v1/responses"),
            RelayFormat::Realtime => {
                let ws_base = base
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!(
                    "{}?model={}",
                    join_url(&ws_base, "v1/realtime"),
                    info.upstream_model
                )
            }
            RelayFormat::Task => match info.action.as_deref() {
                Some("fetch") => {
                    let task_id = info
                        .task_id
                        .as_deref()
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| RelayError::invalid_request("missing task id in path"))?;
                    join_url(base, &format!("v1/videos/{task_id}"))
                }
                _ => join_url(base, "v1/videos"),
            },
            RelayFormat::Messages | RelayFormat::GenerateContent => {
                return Err(RelayError::invalid_request(
                    "dialect not served by openai-compatible channels",
                ));
            }
        };
        Ok(url)
    }

    fn build_headers(&self, info: &RelayInfo) -> Headers {
        let mut headers = Vec::new();
        if let Some(channel) = info.channel() {
            header_set(&mut headers, "authorization", format!("Bearer {}", channel.key));
        }
        header_set(&mut headers, "accept", "application/json");
        if info.format == RelayFormat::Realtime {
            header_set(&mut headers, "openai-beta", "realtime=v1");
            header_set(&mut headers, "sec-websocket-protocol", "realtime");
        }
        headers
    }

    fn build_body(&self, info: &RelayInfo) -> Result<UpstreamPayload, RelayError> {
        if is_multipart(info) {
            // File-bearing requests pass through untouched with their
            // original multipart content type.
            let content_type = info
                .client_headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(UpstreamPayload {
                bytes: info.body.clone(),
                content_type,
            });
        }
        if info.format == RelayFormat::Task && info.action.as_deref() == Some("fetch") {
            return Ok(UpstreamPayload::json(Bytes::new()));
        }
        let bytes = remap_model_in_body(&info.body, &info.origin_model, &info.upstream_model)?;
        Ok(UpstreamPayload::json(bytes))
    }

    fn handle_response(&self, info: &RelayInfo, body: &Bytes) -> Result<Usage, RelayError> {
        if info.format == RelayFormat::Task {
            let task = self.parse_task_result(body)?;
            if let Some(error) = task.error {
                return Err(RelayError::bad_response_body(format!(
                    "task failed upstream: {error}"
                )));
            }
            return Ok(Usage::default());
        }
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            // Binary payloads (audio speech, image bytes) carry no usage.
            Err(_) if matches!(info.format, RelayFormat::Audio | RelayFormat::Image) => {
                return Ok(Usage::default());
            }
            Err(err) => return Err(RelayError::bad_response_body(err.to_string())),
        };
        if info.format == RelayFormat::Chat {
            let empty = value
                .get("choices")
                .and_then(Value::as_array)
                .is_none_or(|choices| choices.is_empty());
            if empty {
                return Err(RelayError::empty_response());
            }
        }
        Ok(usage_from_openai_value(&value).unwrap_or_default())
    }

    fn observe_frame(&self, event: &SseEvent, observation: &mut StreamObservation) {
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            return;
        };
        if let Some(usage) = usage_from_openai_value(&value) {
            observation.merge_usage(usage);
        }
        if let Some(text) = chat::delta_text_from_value(&value) {
            observation.completion_text.push_str(text);
        }
        // Responses-dialect stream deltas.
        if value.get("type").and_then(Value::as_str) == Some("response.output_text.delta")
            && let Some(delta) = value.get("delta").and_then(Value::as_str)
        {
            observation.completion_text.push_str(delta);
        }
    }

    fn parse_task_result(&self, body: &Bytes) -> Result<TaskInfo, RelayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::bad_response_body(err.to_string()))?;
        let task_id = value
            .get("id")
            .or_else(|| value.get("task_id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if task_id.is_empty() {
            return Err(RelayError::bad_response_body("task response without id"));
        }
        Ok(TaskInfo {
            task_id,
            status: value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            progress: value
                .get("progress")
                .and_then(Value::as_u64)
                .and_then(|p| u32::try_from(p).ok()),
            error: value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Chat and responses dialects disagree on usage field names; accept both.
fn usage_from_openai_value(value: &Value) -> Option<Usage> {
    if let Some(usage) = chat::usage_from_value(value) {
        return Some(usage);
    }
    let usage = value
        .get("usage")
        .or_else(|| value.get("response").and_then(|r| r.get("usage")))?;
    let input = usage.get("input_tokens").and_then(Value::as_u64)?;
    let output = usage
        .get("output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Some(Usage::new(input, output))
}

fn is_multipart(info: &RelayInfo) -> bool {
    info.client_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}
