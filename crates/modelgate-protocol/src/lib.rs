//! Wire shapes the relay reads and writes.
//!
//! The relay forwards request and response bodies byte-for-byte; these types
//! cover only what it has to look at on the way through: the model name, the
//! stream flag, token limits, usage metadata, and the dialect error envelopes.

pub mod chat;
pub mod envelope;
pub mod gemini;
pub mod messages;
pub mod sse;
pub mod usage;

pub use sse::{SseEvent, SseScanner, StreamFraming};
pub use usage::Usage;
