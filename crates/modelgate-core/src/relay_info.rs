use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;

use crate::channel::Channel;
use crate::price::PriceData;
use crate::select::PinnedChannel;

/// Wire dialect the client spoke, decided by URL prefix and body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayFormat {
    Chat,
    Embeddings,
    Rerank,
    Image,
    Audio,
    Responses,
    Messages,
    GenerateContent,
    Realtime,
    Task,
}

impl RelayFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayFormat::Chat => "chat",
            RelayFormat::Embeddings => "embeddings",
            RelayFormat::Rerank => "rerank",
            RelayFormat::Image => "image",
            RelayFormat::Audio => "audio",
            RelayFormat::Responses => "responses",
            RelayFormat::Messages => "messages",
            RelayFormat::GenerateContent => "generate_content",
            RelayFormat::Realtime => "realtime",
            RelayFormat::Task => "task",
        }
    }
}

/// Per-request control block, owned by the orchestrator for the request's
/// lifetime and passed explicitly to every stage.
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub trace_id: String,
    /// Deterministic routing seed from `X-Request-Id` / `request_id`.
    pub request_id: Option<String>,
    pub format: RelayFormat,
    pub user_id: i64,
    pub token_id: i64,
    pub token_name: String,
    /// Resolved routing group.
    pub group: String,
    /// Model name as the client sent it.
    pub origin_model: String,
    /// Model name after the chosen channel's remap.
    pub upstream_model: String,
    /// Chosen channel snapshot for the current attempt.
    pub channel: Option<Arc<Channel>>,
    pub pinned: Option<PinnedChannel>,
    pub price: PriceData,
    pub estimated_prompt_tokens: u64,
    pub final_pre_consumed: i64,
    pub attempt: u32,
    /// Every channel id dispatched to, in order.
    pub use_channel: Vec<i64>,
    /// Buffered request body; each attempt re-sends these exact bytes.
    pub body: Bytes,
    pub is_stream: bool,
    /// Combined text view, built only when metering or scanning needs it.
    pub combined_text: Option<String>,
    pub output_cap: Option<u32>,
    /// Client request headers, for adapter pass-through rules.
    pub client_headers: HeaderMap,
    /// Sub-verb from the URL (`streamGenerateContent`, `edits`, `fetch`).
    pub action: Option<String>,
    /// Task id addressed by a task-fetch request.
    pub task_id: Option<String>,
}

impl RelayInfo {
    pub fn channel(&self) -> Option<&Arc<Channel>> {
        self.channel.as_ref()
    }

    pub fn record_attempt(&mut self, channel: Arc<Channel>) {
        self.use_channel.push(channel.id);
        self.upstream_model = channel.remap_model(&self.origin_model).to_string();
        self.channel = Some(channel);
    }

    /// Drop the channel binding so the selector can pick a new channel on
    /// the next attempt. Pinned bindings stay.
    pub fn clear_channel_binding(&mut self) {
        if self.pinned.is_none() {
            self.channel = None;
        }
    }
}
