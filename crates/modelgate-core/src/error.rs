use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;

use modelgate_protocol::envelope;

use crate::headers::{Headers, header_get};
use crate::relay_info::RelayFormat;

/// Stable error kinds carried by every relay error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    BodyTooLarge,
    GetChannelFailed,
    ChannelUpstreamError,
    BadResponseBody,
    EmptyResponse,
    CountTokenFailed,
    ModelPriceError,
    SensitiveWordsDetected,
    InsufficientQuota,
    UpstreamFailure,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::BodyTooLarge => "request_body_too_large",
            ErrorKind::GetChannelFailed => "get_channel_failed",
            ErrorKind::ChannelUpstreamError => "channel_upstream_error",
            ErrorKind::BadResponseBody => "bad_response_body",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::CountTokenFailed => "count_token_failed",
            ErrorKind::ModelPriceError => "model_price_error",
            ErrorKind::SensitiveWordsDetected => "sensitive_words_detected",
            ErrorKind::InsufficientQuota => "insufficient_quota",
            ErrorKind::UpstreamFailure => "upstream_failure",
        }
    }
}

/// Behaviour flags attached to an error, consulted by the retry controller
/// and the channel-error side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorOptions {
    /// Forbids further attempts regardless of any other signal.
    pub skip_retry: bool,
    /// The channel itself failed; another channel may succeed.
    pub channel_fatal: bool,
    /// Append to the error log (asynchronously).
    pub record_log: bool,
    /// The failure pattern warrants disabling the channel when its
    /// `auto_ban` flag is set.
    pub auto_ban_candidate: bool,
}

/// Tagged error value for the whole relay path. Errors are data: they carry
/// the HTTP status to answer with, the kind code, behaviour flags, and the
/// upstream body when one was received.
#[derive(Debug, Clone)]
pub struct RelayError {
    kind: ErrorKind,
    status: StatusCode,
    message: String,
    options: ErrorOptions,
    upstream_body: Option<Bytes>,
    retry_after: Option<Duration>,
}

impl RelayError {
    pub fn new(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: mask_credentials(&message.into()),
            options: ErrorOptions::default(),
            upstream_body: None,
            retry_after: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, StatusCode::BAD_REQUEST, message).with_skip_retry()
    }

    pub fn body_too_large(limit: usize) -> Self {
        Self::new(
            ErrorKind::BodyTooLarge,
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds the configured maximum of {limit} bytes"),
        )
        .with_skip_retry()
    }

    pub fn no_channel_available(group: &str, model: &str) -> Self {
        Self::new(
            ErrorKind::GetChannelFailed,
            StatusCode::SERVICE_UNAVAILABLE,
            format!("no available channel for model {model} in group {group}"),
        )
        .with_skip_retry()
    }

    pub fn sensitive_words(words: &[String]) -> Self {
        Self::new(
            ErrorKind::SensitiveWordsDetected,
            StatusCode::BAD_REQUEST,
            format!("sensitive words detected: {}", words.join(", ")),
        )
        .with_skip_retry()
    }

    pub fn insufficient_quota() -> Self {
        Self::new(
            ErrorKind::InsufficientQuota,
            StatusCode::FORBIDDEN,
            "insufficient quota for this request",
        )
        .with_skip_retry()
    }

    pub fn count_token_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CountTokenFailed,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
        )
        .with_skip_retry()
    }

    pub fn model_price_error(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ModelPriceError,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
        )
        .with_skip_retry()
    }

    pub fn bad_response_body(message: impl Into<String>) -> Self {
        let mut err = Self::new(
            ErrorKind::BadResponseBody,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
        );
        err.options.record_log = true;
        err
    }

    pub fn empty_response() -> Self {
        let mut err = Self::new(
            ErrorKind::EmptyResponse,
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream returned an empty completion",
        );
        err.options.record_log = true;
        err
    }

    /// Classify a non-2xx upstream response.
    pub fn upstream(status: StatusCode, body: Bytes) -> Self {
        Self::upstream_with_headers(status, &Vec::new(), body)
    }

    pub fn upstream_with_headers(status: StatusCode, headers: &Headers, body: Bytes) -> Self {
        let mut err = Self {
            kind: ErrorKind::ChannelUpstreamError,
            status,
            message: mask_credentials(&upstream_message(status, &body)),
            options: ErrorOptions {
                record_log: true,
                ..ErrorOptions::default()
            },
            upstream_body: Some(body),
            retry_after: None,
        };
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            err.options.channel_fatal = true;
            err.options.auto_ban_candidate = true;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            err.retry_after = retry_after_duration(headers);
            if err.message.contains("quota") {
                err.options.auto_ban_candidate = true;
            }
        }
        err
    }

    /// A transport-level failure (dial, TLS, read timeout) with no response.
    pub fn transport(message: impl Into<String>) -> Self {
        let mut err = Self::new(
            ErrorKind::UpstreamFailure,
            StatusCode::SERVICE_UNAVAILABLE,
            message,
        );
        err.options.channel_fatal = true;
        err.options.record_log = true;
        err
    }

    /// Client went away mid-stream; settlement proceeds, retry must not.
    pub fn client_cancelled() -> Self {
        Self::new(
            ErrorKind::UpstreamFailure,
            StatusCode::INTERNAL_SERVER_ERROR,
            "client disconnected before the stream completed",
        )
        .with_skip_retry()
    }

    pub fn with_skip_retry(mut self) -> Self {
        self.options.skip_retry = true;
        self
    }

    pub fn with_record_log(mut self) -> Self {
        self.options.record_log = true;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn options(&self) -> ErrorOptions {
        self.options
    }

    pub fn upstream_body(&self) -> Option<&Bytes> {
        self.upstream_body.as_ref()
    }

    /// Upstream-requested cooldown before another attempt (429 only).
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn append_request_id(&mut self, request_id: &str) {
        self.message = format!("{} (request id: {request_id})", self.message);
    }

    /// Render the dialect-appropriate error envelope.
    pub fn render(&self, format: RelayFormat) -> Value {
        match format {
            RelayFormat::Messages => envelope::messages_error(&self.message, error_type(self.status)),
            RelayFormat::Realtime => {
                envelope::realtime_error_event(&self.message, error_type(self.status), self.kind.code())
            }
            RelayFormat::Task => envelope::task_error(
                self.status.as_u16(),
                &self.message,
                self.kind.code(),
                is_local_kind(self.kind),
            ),
            _ => envelope::chat_error(&self.message, error_type(self.status), self.kind.code()),
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind.code(), self.status, self.message)
    }
}

impl std::error::Error for RelayError {}

fn is_local_kind(kind: ErrorKind) -> bool {
    !matches!(
        kind,
        ErrorKind::ChannelUpstreamError | ErrorKind::UpstreamFailure | ErrorKind::EmptyResponse
    )
}

fn error_type(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "invalid_request_error"
    } else {
        "api_error"
    }
}

fn upstream_message(status: StatusCode, body: &Bytes) -> String {
    // Prefer the upstream's own message when the body parses as either
    // dialect envelope; fall back to the raw (truncated) body.
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .or_else(|| value.get("message").and_then(Value::as_str));
        if let Some(message) = message {
            return format!("upstream error {}: {message}", status.as_u16());
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    let text = if text.len() > 512 { &text[..512] } else { text };
    if text.is_empty() {
        format!("upstream error {}", status.as_u16())
    } else {
        format!("upstream error {}: {text}", status.as_u16())
    }
}

fn retry_after_duration(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

/// Blank out anything that looks like a bearer credential before a message
/// can reach logs or clients.
fn mask_credentials(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(pos) = rest.find("sk-") {
        out.push_str(&rest[..pos]);
        out.push_str("sk-***");
        let tail = &rest[pos + 3..];
        let end = tail
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}
