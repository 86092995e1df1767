use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use modelgate_protocol::{SseEvent, Usage};

use crate::error::RelayError;
use crate::headers::Headers;
use crate::relay_info::{RelayFormat, RelayInfo};
use crate::upstream::{UpstreamClient, UpstreamFailure};

/// Upstream request as an adapter builds it. The engine delivers `body`
/// exactly as produced; `content_type` overrides the default JSON when an
/// adapter re-encodes (e.g. JSON to multipart for file-bearing requests).
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// Body plus optional content-type override produced by `build_body`.
#[derive(Debug, Clone)]
pub struct UpstreamPayload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl UpstreamPayload {
    pub fn json(bytes: Bytes) -> Self {
        Self {
            bytes,
            content_type: None,
        }
    }
}

/// Result of polling an async task provider.
#[derive(Debug, Clone, Default)]
pub struct TaskInfo {
    pub task_id: String,
    pub status: String,
    pub progress: Option<u32>,
    pub error: Option<String>,
}

/// Running observation a stream pump maintains; adapters fold their dialect's
/// frames into it.
#[derive(Debug, Default)]
pub struct StreamObservation {
    pub usage: Usage,
    pub saw_usage: bool,
    pub completion_text: String,
    pub saw_done: bool,
}

impl StreamObservation {
    pub fn merge_usage(&mut self, usage: Usage) {
        self.usage.merge(usage);
        self.saw_usage = true;
    }
}

/// Capability set every upstream provider family implements. Adapters are
/// stateless and reentrant; all per-request state lives in `RelayInfo`.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reject requests this provider cannot serve before any quota moves.
    fn validate(&self, info: &RelayInfo, body: &Value) -> Result<(), RelayError>;

    fn method(&self, _info: &RelayInfo) -> http::Method {
        http::Method::POST
    }

    fn build_url(&self, info: &RelayInfo) -> Result<String, RelayError>;

    fn build_headers(&self, info: &RelayInfo) -> Headers;

    fn build_body(&self, info: &RelayInfo) -> Result<UpstreamPayload, RelayError>;

    /// Dispatch through the shared HTTP client pool. Adapters only override
    /// this when their transport differs from plain HTTP.
    async fn do_request(
        &self,
        client: &dyn UpstreamClient,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamFailure> {
        client.send(request).await
    }

    /// Non-streaming case: extract usage from a 2xx response body.
    fn handle_response(&self, info: &RelayInfo, body: &Bytes) -> Result<Usage, RelayError>;

    /// Streaming case: fold one upstream frame into the running observation.
    fn observe_frame(&self, event: &SseEvent, observation: &mut StreamObservation);

    /// Async task providers only.
    fn parse_task_result(&self, _body: &Bytes) -> Result<TaskInfo, RelayError> {
        Err(RelayError::invalid_request(
            "this provider does not expose task results",
        ))
    }
}

/// (request format, channel type) -> adapter lookup, implemented by the
/// adapter crate and handed to the engine at bootstrap.
pub trait AdapterDispatch: Send + Sync {
    fn adapter_for(&self, format: RelayFormat, channel_type: &str) -> Option<Arc<dyn Adapter>>;
}
