use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use modelgate_common::GlobalConfig;
use modelgate_protocol::{Usage, chat, gemini, messages};
use modelgate_storage::Storage;

use crate::adapter::{AdapterDispatch, UpstreamBody, UpstreamRequest};
use crate::auth::AuthContext;
use crate::channel::Channel;
use crate::error::{ErrorKind, RelayError};
use crate::estimate;
use crate::events::{self, ErrorLogSink};
use crate::guard;
use crate::headers::{Headers, header_get, header_set};
use crate::ledger::{QuotaLedger, Reservation};
use crate::price::{self, PriceData};
use crate::pump;
use crate::registry::ChannelRegistry;
use crate::relay_info::{RelayFormat, RelayInfo};
use crate::retry::{self, RetryContext};
use crate::select::{self, SelectContext};
use crate::tunnel;
use crate::upstream::UpstreamClient;

/// Validated client request as the router hands it to the engine.
pub struct RelayRequest {
    pub format: RelayFormat,
    pub auth: AuthContext,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Model addressed in the URL (generate-content, realtime, task fetch).
    pub path_model: Option<String>,
    /// Sub-verb from the URL (`generateContent`, `streamGenerateContent`,
    /// `embedContent`, task `fetch`).
    pub action: Option<String>,
    pub trace_id: String,
}

pub enum RelayBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: RelayBody,
}

impl RelayResponse {
    fn json(status: StatusCode, value: &Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: RelayBody::Bytes(Bytes::from(body)),
        }
    }
}

struct ParsedRequest {
    model: String,
    is_stream: bool,
    output_cap: Option<u32>,
    combined_text: Option<String>,
}

/// Top-level request lifecycle: validate → estimate → reserve → attempt loop
/// → settle. One engine is shared by every route; per-request state lives in
/// the `RelayInfo` each call owns.
pub struct RelayEngine {
    config: Arc<GlobalConfig>,
    registry: Arc<ChannelRegistry>,
    ledger: Arc<QuotaLedger>,
    client: Arc<dyn UpstreamClient>,
    storage: Arc<dyn Storage>,
    error_log: Arc<ErrorLogSink>,
    adapters: Arc<dyn AdapterDispatch>,
}

impl RelayEngine {
    pub fn new(
        config: Arc<GlobalConfig>,
        registry: Arc<ChannelRegistry>,
        ledger: Arc<QuotaLedger>,
        client: Arc<dyn UpstreamClient>,
        storage: Arc<dyn Storage>,
        error_log: Arc<ErrorLogSink>,
        adapters: Arc<dyn AdapterDispatch>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
            client,
            storage,
            error_log,
            adapters,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// The 413 threshold; the router bounds its body buffering to this.
    pub fn max_body_bytes(&self) -> usize {
        self.config.relay.max_body_bytes
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Handle one HTTP-dialect request end to end. Errors come back already
    /// rendered in the dialect envelope.
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        let format = request.format;
        let trace_id = request.trace_id.clone();
        let request_id = request_id_header(&request.headers);
        match self.relay(request).await {
            Ok(response) => response,
            Err(mut err) => {
                if let Some(request_id) = &request_id {
                    err.append_request_id(request_id);
                } else {
                    err.append_request_id(&trace_id);
                }
                warn!(
                    event = "relay_error",
                    trace_id = %trace_id,
                    kind = err.kind().code(),
                    status = err.status().as_u16(),
                    message = %err.message(),
                );
                RelayResponse::json(err.status(), &err.render(format))
            }
        }
    }

    async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let relay_cfg = &self.config.relay;
        if request.body.len() > relay_cfg.max_body_bytes {
            return Err(RelayError::body_too_large(relay_cfg.max_body_bytes));
        }

        let metering = relay_cfg.check_sensitive || relay_cfg.count_tokens;
        let parsed = parse_request(
            request.format,
            &request.body,
            request.path_model.as_deref(),
            request.action.as_deref(),
            metering,
        )?;

        if !request.auth.model_allow_list.is_empty()
            && !parsed.model.is_empty()
            && !request.auth.model_allow_list.contains(&parsed.model)
        {
            return Err(RelayError::invalid_request(format!(
                "token is not allowed to use model {}",
                parsed.model
            )));
        }

        let mut info = build_relay_info(&request, parsed);

        if relay_cfg.check_sensitive
            && let Some(text) = info.combined_text.as_deref()
            && let Some(words) = guard::scan_sensitive(text, &relay_cfg.sensitive_words)
        {
            warn!(event = "sensitive_words", trace_id = %info.trace_id, words = ?words);
            return Err(RelayError::sensitive_words(&words));
        }

        info.estimated_prompt_tokens = estimate::estimate_prompt_tokens(
            &info.origin_model,
            info.combined_text.as_deref().filter(|_| relay_cfg.count_tokens),
            message_count_for(&info),
        )?;

        info.price = price::resolve_price(
            relay_cfg,
            &info.group,
            &info.origin_model,
            info.estimated_prompt_tokens,
            info.output_cap,
        )?;
        if info.format == RelayFormat::Task && info.action.as_deref() == Some("fetch") {
            // Polling a task is not a billable call.
            info.price.free_model = true;
            info.price.quota_to_pre_consume = 0;
        }

        // Token-level gate first (unlimited or enough remaining), then the
        // user balance reservation.
        if !request.auth.unlimited_quota
            && request.auth.remain_quota < info.price.quota_to_pre_consume
        {
            return Err(RelayError::insufficient_quota());
        }
        let reservation = self
            .ledger
            .pre_consume(info.user_id, info.token_id, info.price.quota_to_pre_consume)
            .await?;
        info.final_pre_consumed = reservation.amount();
        if info.price.free_model {
            info!(
                event = "free_model",
                trace_id = %info.trace_id,
                model = %info.origin_model,
                "skipping pre-consume for free model"
            );
        }

        let result = self.attempt_loop(&mut info, &reservation).await;

        if info.use_channel.len() > 1 {
            let trace: Vec<String> = info.use_channel.iter().map(|id| id.to_string()).collect();
            info!(
                event = "retry_trace",
                trace_id = %info.trace_id,
                channels = %trace.join("->"),
            );
        }

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                // Quota must never leak: anything reserved and not settled
                // goes back before the error reaches the client. A zero
                // reservation refunds nothing but still clears its handle.
                self.ledger.refund(&reservation).await;
                Err(err)
            }
        }
    }

    async fn attempt_loop(
        &self,
        info: &mut RelayInfo,
        reservation: &Reservation,
    ) -> Result<RelayResponse, RelayError> {
        let retry_times = self.config.relay.retry_times;
        loop {
            let channel = {
                let ctx = SelectContext {
                    group: &info.group,
                    model: &info.origin_model,
                    request_id: info.request_id.as_deref(),
                    pinned: info.pinned.as_ref(),
                    excluded: &info.use_channel,
                    attempt: info.attempt,
                };
                select::select(&self.registry, &ctx)?
            };
            info.record_attempt(channel.clone());
            info!(
                event = "attempt",
                trace_id = %info.trace_id,
                attempt = info.attempt,
                channel_id = channel.id,
                model = %info.upstream_model,
            );

            let err = match self.dispatch(info, reservation).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            self.process_channel_error(info, &channel, &err);

            let ctx = RetryContext {
                attempts_remaining: retry_times.saturating_sub(info.attempt),
                pinned: info.pinned.is_some(),
                allow_all_retry: channel.settings.allow_all_retry,
            };
            if !retry::should_retry(&err, &ctx) {
                return Err(err);
            }
            info.attempt += 1;
            info.clear_channel_binding();
            match err.retry_after() {
                // Honour the upstream's cooldown request, bounded so one
                // channel cannot stall the whole attempt budget.
                Some(cooldown) => {
                    tokio::time::sleep(cooldown.min(Duration::from_secs(5))).await;
                }
                None => retry::backoff_sleep(info.attempt).await,
            }
        }
    }

    async fn dispatch(
        &self,
        info: &mut RelayInfo,
        reservation: &Reservation,
    ) -> Result<RelayResponse, RelayError> {
        let channel = info
            .channel()
            .cloned()
            .ok_or_else(|| RelayError::no_channel_available(&info.group, &info.origin_model))?;
        let adapter = self
            .adapters
            .adapter_for(info.format, &channel.channel_type)
            .ok_or_else(|| {
                RelayError::new(
                    ErrorKind::ChannelUpstreamError,
                    StatusCode::NOT_IMPLEMENTED,
                    format!(
                        "channel type {} cannot serve {} requests",
                        channel.channel_type,
                        info.format.as_str()
                    ),
                )
                .with_record_log()
            })?;

        let body_json = serde_json::from_slice(&info.body).unwrap_or(Value::Null);
        adapter.validate(info, &body_json)?;

        let url = adapter.build_url(info)?;
        let mut headers = adapter.build_headers(info);
        let payload = adapter.build_body(info)?;
        if let Some(content_type) = &payload.content_type {
            header_set(&mut headers, "content-type", content_type.clone());
        } else if header_get(&headers, "content-type").is_none() {
            header_set(&mut headers, "content-type", "application/json");
        }

        let upstream_request = UpstreamRequest {
            method: adapter.method(info),
            url,
            headers,
            body: (!payload.bytes.is_empty()).then_some(payload.bytes),
            is_stream: info.is_stream,
        };
        let response = adapter
            .do_request(self.client.as_ref(), upstream_request)
            .await
            .map_err(|failure| RelayError::transport(failure.message))?;

        let status =
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match response.body {
            UpstreamBody::Bytes(body) => {
                if !status.is_success() {
                    return Err(RelayError::upstream_with_headers(
                        status,
                        &response.headers,
                        body,
                    ));
                }
                if body.is_empty() {
                    return Err(RelayError::empty_response());
                }
                let usage = adapter.handle_response(info, &body)?;
                self.settle(info, reservation, usage).await;
                Ok(RelayResponse {
                    status,
                    headers: forwardable_headers(&response.headers),
                    body: RelayBody::Bytes(body),
                })
            }
            UpstreamBody::Stream(upstream_rx) => {
                // 2xx streaming: hand frames to the client immediately and
                // settle when the stream ends, inside the pump task.
                let (client_tx, client_rx) = mpsc::channel::<Bytes>(32);
                let engine = self.clone_for_task();
                let stream_info = info.clone();
                let stream_reservation = reservation.clone();
                tokio::spawn(async move {
                    let keepalive = engine.spawn_reservation_keepalive(&stream_reservation);
                    let outcome =
                        pump::pump_stream(adapter.as_ref(), &stream_info, upstream_rx, client_tx)
                            .await;
                    if let Some(keepalive) = keepalive {
                        keepalive.abort();
                    }
                    engine
                        .settle_stream(&stream_info, &stream_reservation, outcome)
                        .await;
                });
                Ok(RelayResponse {
                    status,
                    headers: forwardable_headers(&response.headers),
                    body: RelayBody::Stream(client_rx),
                })
            }
        }
    }

    /// Realtime-format requests: upgrade already happened in the router;
    /// the engine owns channel selection, the tunnel, and settlement.
    pub async fn handle_realtime(&self, mut socket: WebSocket, request: RelayRequest) {
        let parsed = ParsedRequest {
            model: request.path_model.clone().unwrap_or_default(),
            is_stream: true,
            output_cap: None,
            combined_text: None,
        };
        let mut info = build_relay_info(&request, parsed);

        let price = price::resolve_price(
            &self.config.relay,
            &info.group,
            &info.origin_model,
            0,
            None,
        );
        let price = match price {
            Ok(price) => price,
            Err(err) => {
                send_ws_error(&mut socket, &err).await;
                return;
            }
        };
        info.price = price;

        if !request.auth.unlimited_quota
            && request.auth.remain_quota < info.price.quota_to_pre_consume
        {
            send_ws_error(&mut socket, &RelayError::insufficient_quota()).await;
            return;
        }
        let reservation = match self
            .ledger
            .pre_consume(info.user_id, info.token_id, info.price.quota_to_pre_consume)
            .await
        {
            Ok(reservation) => reservation,
            Err(err) => {
                send_ws_error(&mut socket, &err).await;
                return;
            }
        };
        info.final_pre_consumed = reservation.amount();
        // Realtime sessions routinely outlive the reservation TTL; keep the
        // handle fresh until the tunnel closes.
        let keepalive = self.spawn_reservation_keepalive(&reservation);

        let retry_times = self.config.relay.retry_times;
        let terminal = loop {
            let channel = {
                let ctx = SelectContext {
                    group: &info.group,
                    model: &info.origin_model,
                    request_id: info.request_id.as_deref(),
                    pinned: info.pinned.as_ref(),
                    excluded: &info.use_channel,
                    attempt: info.attempt,
                };
                match select::select(&self.registry, &ctx) {
                    Ok(channel) => channel,
                    Err(err) => break Some(err),
                }
            };
            info.record_attempt(channel.clone());

            let Some(adapter) = self
                .adapters
                .adapter_for(RelayFormat::Realtime, &channel.channel_type)
            else {
                break Some(RelayError::invalid_request(format!(
                    "channel type {} has no realtime endpoint",
                    channel.channel_type
                )));
            };
            let url = match adapter.build_url(&info) {
                Ok(url) => url,
                Err(err) => break Some(err),
            };
            let headers = adapter.build_headers(&info);

            match tunnel::run_tunnel(&info, &mut socket, &url, &headers).await {
                Ok(outcome) => {
                    if outcome.saw_usage {
                        let cost = info
                            .price
                            .cost(outcome.usage.prompt_tokens, outcome.usage.completion_tokens);
                        self.ledger.settle(&reservation, cost).await;
                    } else {
                        self.ledger.refund(&reservation).await;
                    }
                    break None;
                }
                Err(err) => {
                    // Dial failures may move to another channel; anything
                    // after the tunnel opened is terminal.
                    self.process_channel_error(&info, &channel, &err);
                    let ctx = RetryContext {
                        attempts_remaining: retry_times.saturating_sub(info.attempt),
                        pinned: info.pinned.is_some(),
                        allow_all_retry: channel.settings.allow_all_retry,
                    };
                    if !retry::should_retry(&err, &ctx) {
                        break Some(err);
                    }
                    info.attempt += 1;
                    info.clear_channel_binding();
                    retry::backoff_sleep(info.attempt).await;
                }
            }
        };

        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        if let Some(mut err) = terminal {
            self.ledger.refund(&reservation).await;
            err.append_request_id(info.request_id.as_deref().unwrap_or(&info.trace_id));
            send_ws_error(&mut socket, &err).await;
        }
    }

    async fn settle(&self, info: &RelayInfo, reservation: &Reservation, usage: Usage) {
        let usage = if usage.is_empty() {
            // Unary responses without usage metadata settle against the
            // estimate so the reservation never silently leaks.
            Usage::new(info.estimated_prompt_tokens, 0)
        } else {
            usage
        };
        let cost = info
            .price
            .cost(usage.prompt_tokens, usage.completion_tokens);
        self.ledger.settle(reservation, cost).await;
        info!(
            event = "settled",
            trace_id = %info.trace_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost,
            pre_consumed = info.final_pre_consumed,
        );
    }

    async fn settle_stream(
        &self,
        info: &RelayInfo,
        reservation: &Reservation,
        outcome: pump::PumpOutcome,
    ) {
        let mut usage = outcome.usage;
        if !outcome.saw_usage {
            if outcome.completion_text.is_empty() {
                // Nothing observed at all (e.g. cancel before any frame):
                // return the reservation rather than billing on air.
                self.ledger.refund(reservation).await;
                return;
            }
            // Back-compute from the concatenated completion text.
            let completion =
                estimate::count_text_tokens(&info.upstream_model, &outcome.completion_text)
                    .unwrap_or(0);
            usage = Usage::new(info.estimated_prompt_tokens, completion);
        }
        self.settle(info, reservation, usage).await;
    }

    fn process_channel_error(&self, info: &RelayInfo, channel: &Channel, err: &RelayError) {
        warn!(
            event = "channel_error",
            trace_id = %info.trace_id,
            channel_id = channel.id,
            status = err.status().as_u16(),
            kind = err.kind().code(),
            message = %err.message(),
        );
        if err.options().auto_ban_candidate && channel.auto_ban {
            events::disable_channel_async(
                self.registry.clone(),
                self.storage.clone(),
                channel.id,
                err.message().to_string(),
            );
        }
        if self.config.relay.error_log_enabled && err.options().record_log {
            self.error_log.submit(events::error_log_row(info, channel, err));
        }
    }

    /// Periodically refresh the reservation while a stream or tunnel is
    /// live, so the ledger sweeper cannot mistake it for abandoned. Abort
    /// the returned task once the connection ends.
    fn spawn_reservation_keepalive(
        &self,
        reservation: &Reservation,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let ttl = Duration::from_secs(self.config.relay.reservation_ttl_secs);
        if ttl.is_zero() {
            return None;
        }
        let ledger = self.ledger.clone();
        let reservation = reservation.clone();
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl / 4);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                ledger.touch(&reservation).await;
            }
        }))
    }

    fn clone_for_task(&self) -> RelayEngine {
        RelayEngine {
            config: self.config.clone(),
            registry: self.registry.clone(),
            ledger: self.ledger.clone(),
            client: self.client.clone(),
            storage: self.storage.clone(),
            error_log: self.error_log.clone(),
            adapters: self.adapters.clone(),
        }
    }
}

async fn send_ws_error(socket: &mut WebSocket, err: &RelayError) {
    let frame = err.render(RelayFormat::Realtime);
    let payload = serde_json::to_string(&frame).unwrap_or_default();
    let _ = socket.send(WsMessage::Text(payload.into())).await;
    let _ = socket.close().await;
}

fn build_relay_info(request: &RelayRequest, parsed: ParsedRequest) -> RelayInfo {
    RelayInfo {
        trace_id: request.trace_id.clone(),
        request_id: request_id_header(&request.headers),
        format: request.format,
        user_id: request.auth.user_id,
        token_id: request.auth.token_id,
        token_name: request.auth.token_name.clone(),
        group: request.auth.group.clone(),
        origin_model: parsed.model.clone(),
        upstream_model: parsed.model,
        channel: None,
        pinned: request.auth.pinned.clone(),
        price: PriceData::default(),
        estimated_prompt_tokens: 0,
        final_pre_consumed: 0,
        attempt: 0,
        use_channel: Vec::new(),
        body: request.body.clone(),
        is_stream: parsed.is_stream,
        combined_text: parsed.combined_text,
        output_cap: parsed.output_cap,
        client_headers: request.headers.clone(),
        action: request.action.clone(),
        task_id: (request.format == RelayFormat::Task
            && request.action.as_deref() == Some("fetch"))
        .then(|| request.path_model.clone().unwrap_or_default()),
    }
}

fn message_count_for(info: &RelayInfo) -> usize {
    // The estimate floor only needs a rough message count; one suffices on
    // the fast path where no combined text was built.
    info.combined_text
        .as_deref()
        .map(|text| text.split('\n').count())
        .unwrap_or(1)
}

fn request_id_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .or_else(|| headers.get("request_id"))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Upstream response headers safe to forward. The body is re-framed by the
/// server, so length and codings are dropped; bodies arrive already decoded.
fn forwardable_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| {
            !matches!(
                name.to_ascii_lowercase().as_str(),
                "content-length"
                    | "transfer-encoding"
                    | "content-encoding"
                    | "connection"
                    | "keep-alive"
                    | "authorization"
            )
        })
        .cloned()
        .collect()
}

fn parse_request(
    format: RelayFormat,
    body: &Bytes,
    path_model: Option<&str>,
    action: Option<&str>,
    metering: bool,
) -> Result<ParsedRequest, RelayError> {
    match format {
        RelayFormat::Chat => {
            let request: chat::ChatCompletionRequest = serde_json::from_slice(body)
                .map_err(|err| RelayError::invalid_request(format!("malformed request: {err}")))?;
            Ok(ParsedRequest {
                model: request.model.clone(),
                is_stream: request.is_stream(),
                output_cap: request.output_cap(),
                combined_text: metering.then(|| request.combined_text()),
            })
        }
        RelayFormat::Messages => {
            let request: messages::MessagesRequest = serde_json::from_slice(body)
                .map_err(|err| RelayError::invalid_request(format!("malformed request: {err}")))?;
            Ok(ParsedRequest {
                model: request.model.clone(),
                is_stream: request.is_stream(),
                output_cap: Some(request.max_tokens),
                combined_text: metering.then(|| request.combined_text()),
            })
        }
        RelayFormat::GenerateContent => {
            let request: gemini::GenerateContentRequest = serde_json::from_slice(body)
                .map_err(|err| RelayError::invalid_request(format!("malformed request: {err}")))?;
            let model = path_model
                .ok_or_else(|| RelayError::invalid_request("missing model in path"))?
                .to_string();
            Ok(ParsedRequest {
                model,
                is_stream: action == Some("streamGenerateContent"),
                output_cap: request.output_cap(),
                combined_text: metering.then(|| request.combined_text()),
            })
        }
        RelayFormat::Realtime => Ok(ParsedRequest {
            model: path_model.unwrap_or_default().to_string(),
            is_stream: true,
            output_cap: None,
            combined_text: None,
        }),
        // Task fetch addresses a task id, not a model; nothing to meter.
        RelayFormat::Task if action == Some("fetch") => Ok(ParsedRequest {
            model: String::new(),
            is_stream: false,
            output_cap: None,
            combined_text: None,
        }),
        _ => {
            // Generic JSON dialects: embeddings, rerank, image, audio speech,
            // responses, task submit. Multipart bodies fall back to a form
            // field scan for the model.
            let value: Value = match serde_json::from_slice(body) {
                Ok(value) => value,
                Err(_) if format == RelayFormat::Audio => Value::Null,
                Err(err) => {
                    return Err(RelayError::invalid_request(format!(
                        "malformed request: {err}"
                    )));
                }
            };
            let model = value
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| multipart_model(body))
                .or_else(|| path_model.map(str::to_string))
                .ok_or_else(|| RelayError::invalid_request("missing model"))?;
            let is_stream = value.get("stream").and_then(Value::as_bool).unwrap_or(false);
            let output_cap = value
                .get("max_output_tokens")
                .or_else(|| value.get("max_tokens"))
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok());
            let combined_text = metering
                .then(|| {
                    value
                        .get("input")
                        .or_else(|| value.get("prompt"))
                        .or_else(|| value.get("query"))
                        .map(json_text)
                })
                .flatten();
            Ok(ParsedRequest {
                model,
                is_stream,
                output_cap,
                combined_text,
            })
        }
    }
}

/// Best-effort `model` field scan inside a multipart body.
fn multipart_model(body: &Bytes) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let marker = "name=\"model\"";
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let value_start = rest.find("\r\n\r\n").map(|p| p + 4)?;
    let rest = &rest[value_start..];
    let value_end = rest.find('\r').unwrap_or(rest.len());
    let model = rest[..value_end].trim();
    (!model.is_empty()).then(|| model.to_string())
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
