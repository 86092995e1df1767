use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;

use modelgate_protocol::sse::DONE_FRAME;
use modelgate_protocol::{SseScanner, Usage};

use crate::adapter::{Adapter, StreamObservation};
use crate::relay_info::{RelayFormat, RelayInfo};

/// How long to keep draining upstream bytes after the client went away.
const CANCEL_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// What the pump observed by the time the stream ended.
#[derive(Debug, Default)]
pub struct PumpOutcome {
    pub usage: Usage,
    pub saw_usage: bool,
    pub completion_text: String,
    /// Client disconnected before upstream finished.
    pub cancelled: bool,
    pub bytes_forwarded: u64,
    pub frames: u64,
}

/// Copy the upstream event stream to the client with framing preserved.
///
/// Every chunk is forwarded exactly as received; a parallel scan feeds
/// complete frames to the adapter for the running usage fold. When the
/// client disconnects, the upstream receiver is drained briefly and dropped,
/// which tears down the upstream request.
pub async fn pump_stream(
    adapter: &dyn Adapter,
    info: &RelayInfo,
    mut upstream: mpsc::Receiver<Bytes>,
    client: mpsc::Sender<Bytes>,
) -> PumpOutcome {
    let mut scanner = SseScanner::new();
    let mut observation = StreamObservation::default();
    let mut outcome = PumpOutcome::default();

    while let Some(chunk) = upstream.recv().await {
        outcome.bytes_forwarded += chunk.len() as u64;
        for event in scanner.push(&chunk) {
            outcome.frames += 1;
            if event.data == "[DONE]" {
                observation.saw_done = true;
                continue;
            }
            adapter.observe_frame(&event, &mut observation);
        }
        if client.send(chunk).await.is_err() {
            outcome.cancelled = true;
            drain_upstream(&mut upstream).await;
            break;
        }
    }

    if !outcome.cancelled {
        for event in scanner.finish() {
            if event.data == "[DONE]" {
                observation.saw_done = true;
                continue;
            }
            outcome.frames += 1;
            adapter.observe_frame(&event, &mut observation);
        }
        // Chat clients expect the end-of-stream sentinel even when an
        // upstream dialect omits it.
        if info.format == RelayFormat::Chat && !observation.saw_done {
            let _ = client.send(Bytes::from_static(DONE_FRAME)).await;
        }
    }

    if outcome.cancelled {
        info!(
            event = "stream_cancelled",
            trace_id = %info.trace_id,
            frames = outcome.frames,
            bytes = outcome.bytes_forwarded,
            "client disconnected mid-stream"
        );
    }

    outcome.usage = observation.usage;
    outcome.saw_usage = observation.saw_usage;
    outcome.completion_text = observation.completion_text;
    outcome
}

/// Pull remaining upstream bytes with a short deadline so the bridge task
/// notices the closed channel promptly, then drop the receiver.
async fn drain_upstream(upstream: &mut mpsc::Receiver<Bytes>) {
    let _ = tokio::time::timeout(CANCEL_DRAIN_DEADLINE, async {
        while upstream.recv().await.is_some() {}
    })
    .await;
    upstream.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{StreamObservation, UpstreamPayload};
    use crate::error::RelayError;
    use crate::headers::Headers;
    use async_trait::async_trait;
    use http::HeaderMap;
    use modelgate_protocol::SseEvent;
    use serde_json::Value;

    struct ChatScanAdapter;

    #[async_trait]
    impl Adapter for ChatScanAdapter {
        fn name(&self) -> &'static str {
            "chat-scan"
        }
        fn validate(&self, _info: &RelayInfo, _body: &Value) -> Result<(), RelayError> {
            Ok(())
        }
        fn build_url(&self, _info: &RelayInfo) -> Result<String, RelayError> {
            Ok(String::new())
        }
        fn build_headers(&self, _info: &RelayInfo) -> Headers {
            Vec::new()
        }
        fn build_body(&self, _info: &RelayInfo) -> Result<UpstreamPayload, RelayError> {
            Ok(UpstreamPayload::json(Bytes::new()))
        }
        fn handle_response(&self, _info: &RelayInfo, _body: &Bytes) -> Result<Usage, RelayError> {
            Ok(Usage::default())
        }
        fn observe_frame(&self, event: &SseEvent, observation: &mut StreamObservation) {
            let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
                return;
            };
            if let Some(usage) = modelgate_protocol::chat::usage_from_value(&value) {
                observation.merge_usage(usage);
            }
            if let Some(text) = modelgate_protocol::chat::delta_text_from_value(&value) {
                observation.completion_text.push_str(text);
            }
        }
    }

    fn info() -> RelayInfo {
        RelayInfo {
            trace_id: "t".to_string(),
            request_id: None,
            format: RelayFormat::Chat,
            user_id: 1,
            token_id: 1,
            token_name: "tok".to_string(),
            group: "default".to_string(),
            origin_model: "m".to_string(),
            upstream_model: "m".to_string(),
            channel: None,
            pinned: None,
            price: Default::default(),
            estimated_prompt_tokens: 0,
            final_pre_consumed: 0,
            attempt: 0,
            use_channel: Vec::new(),
            body: Bytes::new(),
            is_stream: true,
            combined_text: None,
            output_cap: None,
            client_headers: HeaderMap::new(),
            action: None,
            task_id: None,
        }
    }

    fn frame(payload: &str) -> Bytes {
        Bytes::from(format!("data: {payload}\n\n"))
    }

    #[tokio::test]
    async fn frames_pass_through_byte_for_byte() {
        let (up_tx, up_rx) = mpsc::channel(8);
        let (cl_tx, mut cl_rx) = mpsc::channel(8);
        let chunks = [
            frame(r#"{"choices":[{"delta":{"content":"he"}}]}"#),
            frame(r#"{"choices":[{"delta":{"content":"llo"}}]}"#),
            Bytes::from_static(b"data: [DONE]\n\n"),
        ];
        for chunk in &chunks {
            up_tx.send(chunk.clone()).await.unwrap();
        }
        drop(up_tx);

        let outcome = pump_stream(&ChatScanAdapter, &info(), up_rx, cl_tx).await;

        let mut forwarded = Vec::new();
        while let Some(chunk) = cl_rx.recv().await {
            forwarded.extend_from_slice(&chunk);
        }
        let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(forwarded, expected);
        assert_eq!(outcome.completion_text, "hello");
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn usage_is_folded_from_frames() {
        let (up_tx, up_rx) = mpsc::channel(8);
        let (cl_tx, mut cl_rx) = mpsc::channel(8);
        tokio::spawn(async move { while cl_rx.recv().await.is_some() {} });

        up_tx
            .send(frame(
                r#"{"choices":[{"delta":{"content":"x"}}],"usage":{"prompt_tokens":3,"completion_tokens":5}}"#,
            ))
            .await
            .unwrap();
        drop(up_tx);

        let outcome = pump_stream(&ChatScanAdapter, &info(), up_rx, cl_tx).await;
        assert!(outcome.saw_usage);
        assert_eq!(outcome.usage.prompt_tokens, 3);
        assert_eq!(outcome.usage.completion_tokens, 5);
    }

    #[tokio::test]
    async fn done_terminator_is_appended_for_chat() {
        let (up_tx, up_rx) = mpsc::channel(8);
        let (cl_tx, mut cl_rx) = mpsc::channel(8);
        up_tx
            .send(frame(r#"{"choices":[{"delta":{"content":"x"}}]}"#))
            .await
            .unwrap();
        drop(up_tx);

        let handle = tokio::spawn(async move {
            let mut all = Vec::new();
            while let Some(chunk) = cl_rx.recv().await {
                all.extend_from_slice(&chunk);
            }
            all
        });
        pump_stream(&ChatScanAdapter, &info(), up_rx, cl_tx).await;
        let all = handle.await.unwrap();
        assert!(all.ends_with(b"data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn client_disconnect_cancels_the_pump() {
        let (up_tx, up_rx) = mpsc::channel(8);
        let (cl_tx, cl_rx) = mpsc::channel(1);
        drop(cl_rx);
        up_tx.send(frame(r#"{"a":1}"#)).await.unwrap();
        // The pump must end even though upstream never closes promptly.
        let feeder = tokio::spawn(async move {
            let _ = up_tx.send(frame(r#"{"b":2}"#)).await;
            up_tx
        });
        let outcome = pump_stream(&ChatScanAdapter, &info(), up_rx, cl_tx).await;
        assert!(outcome.cancelled);
        drop(feeder);
    }
}
