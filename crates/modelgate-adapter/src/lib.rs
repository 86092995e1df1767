//! Provider-family adapters and the (format, channel type) dispatch table.
//!
//! Each adapter is one provider family's wire contract: URL shapes, auth
//! headers, body rewrites, and usage extraction. The relay engine calls them
//! through the `Adapter` trait; nothing here holds per-request state.

mod anthropic;
mod dispatch;
mod gemini;
mod openai;
mod util;

pub use anthropic::AnthropicAdapter;
pub use dispatch::AdapterTable;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
