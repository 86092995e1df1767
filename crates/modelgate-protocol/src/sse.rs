use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// How an upstream stream frames its payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFraming {
    Unknown,
    Sse,
    Ndjson,
}

/// Incremental scanner over a byte stream of SSE events or NDJSON lines.
///
/// The scanner never owns the forwarding path: callers pass every chunk
/// through untouched and feed a copy here to observe payloads (usage
/// metadata, completion text). Frames split across chunk boundaries are
/// buffered until complete.
#[derive(Debug)]
pub struct SseScanner {
    buffer: BytesMut,
    framing: StreamFraming,
}

impl Default for SseScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SseScanner {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            framing: StreamFraming::Unknown,
        }
    }

    pub fn framing(&self) -> StreamFraming {
        self.framing
    }

    /// Feed one chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        if self.framing == StreamFraming::Unknown {
            self.sniff();
        }
        match self.framing {
            StreamFraming::Unknown => Vec::new(),
            StreamFraming::Sse => self.drain_sse(),
            StreamFraming::Ndjson => self.drain_ndjson(),
        }
    }

    /// Flush whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match self.framing {
            StreamFraming::Sse => parse_event_block(trimmed.as_bytes())
                .into_iter()
                .collect(),
            _ => vec![SseEvent {
                event: None,
                data: trimmed.to_string(),
            }],
        }
    }

    fn sniff(&mut self) {
        let Some(first) = self
            .buffer
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace())
        else {
            return;
        };
        // SSE streams open with a field name or a comment line; NDJSON opens
        // with a JSON value.
        self.framing = match first {
            b'{' | b'[' => StreamFraming::Ndjson,
            _ => StreamFraming::Sse,
        };
    }

    fn drain_sse(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        loop {
            let Some((end, skip)) = find_block_end(&self.buffer) else {
                break;
            };
            let block = self.buffer.split_to(end);
            let _ = self.buffer.split_to(skip);
            if let Some(event) = parse_event_block(&block) {
                out.push(event);
            }
        }
        out
    }

    fn drain_ndjson(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            let _ = self.buffer.split_to(1);
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() || text == "," {
                continue;
            }
            // Tolerate JSON-array framing: strip the array scaffolding so
            // each element surfaces as one event.
            let text = text
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim_end_matches(',')
                .trim();
            if text.is_empty() {
                continue;
            }
            out.push(SseEvent {
                event: None,
                data: text.to_string(),
            });
        }
        out
    }
}

/// Position of the first blank-line separator, with its width.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut idx = 0;
    while idx + 1 < buf.len() {
        if buf[idx] == b'\n' && buf[idx + 1] == b'\n' {
            return Some((idx, 2));
        }
        if idx + 3 < buf.len() && &buf[idx..idx + 4] == b"\r\n\r\n" {
            return Some((idx, 4));
        }
        idx += 1;
    }
    None
}

fn parse_event_block(block: &[u8]) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let text = std::str::from_utf8(block).ok()?;
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            event = (!value.is_empty()).then(|| value.to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";
