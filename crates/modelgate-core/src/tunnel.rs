use axum::extract::ws::{CloseFrame, Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{info, warn};

use modelgate_protocol::Usage;

use crate::error::RelayError;
use crate::headers::Headers;
use crate::relay_info::RelayInfo;

/// What the tunnel observed by the time either side closed.
#[derive(Debug, Default)]
pub struct TunnelOutcome {
    pub usage: Usage,
    pub saw_usage: bool,
    pub client_frames: u64,
    pub upstream_frames: u64,
}

/// Bidirectional realtime tunnel: client ⇄ gateway ⇄ upstream.
///
/// The upstream handshake carries the channel credential; client-supplied
/// auth never crosses. Message boundaries are opaque, no re-framing. When
/// one side closes, the other is closed with the mirrored close code. Usage
/// events embedded in the stream are folded for settlement.
pub async fn run_tunnel(
    info: &RelayInfo,
    client_socket: &mut WebSocket,
    upstream_url: &str,
    upstream_headers: &Headers,
) -> Result<TunnelOutcome, RelayError> {
    let mut request = upstream_url
        .into_client_request()
        .map_err(|err| RelayError::transport(format!("bad upstream ws url: {err}")))?;
    for (name, value) in upstream_headers {
        let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::try_from(value.as_str()),
        ) else {
            continue;
        };
        request.headers_mut().insert(name, value);
    }

    let (upstream_socket, _) = connect_async(request)
        .await
        .map_err(|err| RelayError::transport(format!("upstream ws dial failed: {err}")))?;
    info!(
        event = "tunnel_open",
        trace_id = %info.trace_id,
        url = %upstream_url,
    );

    let (mut upstream_tx, mut upstream_rx) = upstream_socket.split();
    let mut outcome = TunnelOutcome::default();

    loop {
        tokio::select! {
            client_frame = client_socket.recv() => {
                match client_frame {
                    Some(Ok(ClientMessage::Close(frame))) => {
                        let _ = upstream_tx
                            .send(UpstreamMessage::Close(frame.map(close_to_upstream)))
                            .await;
                        break;
                    }
                    Some(Ok(message)) => {
                        outcome.client_frames += 1;
                        if upstream_tx.send(client_to_upstream(message)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "tunnel_client_error", trace_id = %info.trace_id, error = %err);
                        let _ = upstream_tx
                            .send(UpstreamMessage::Close(Some(UpstreamCloseFrame {
                                code: CloseCode::Away,
                                reason: "client error".into(),
                            })))
                            .await;
                        break;
                    }
                    None => {
                        let _ = upstream_tx
                            .send(UpstreamMessage::Close(Some(UpstreamCloseFrame {
                                code: CloseCode::Away,
                                reason: "client gone".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            upstream_frame = upstream_rx.next() => {
                match upstream_frame {
                    Some(Ok(UpstreamMessage::Close(frame))) => {
                        let _ = client_socket
                            .send(ClientMessage::Close(frame.map(close_to_client)))
                            .await;
                        break;
                    }
                    Some(Ok(message)) => {
                        outcome.upstream_frames += 1;
                        if let UpstreamMessage::Text(text) = &message {
                            observe_usage(text.as_str(), &mut outcome);
                        }
                        let Some(message) = upstream_to_client(message) else {
                            continue;
                        };
                        if client_socket.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "tunnel_upstream_error", trace_id = %info.trace_id, error = %err);
                        let _ = client_socket
                            .send(ClientMessage::Close(Some(CloseFrame {
                                code: 1011,
                                reason: "upstream error".into(),
                            })))
                            .await;
                        break;
                    }
                    None => {
                        let _ = client_socket
                            .send(ClientMessage::Close(Some(CloseFrame {
                                code: 1000,
                                reason: "upstream closed".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    info!(
        event = "tunnel_closed",
        trace_id = %info.trace_id,
        client_frames = outcome.client_frames,
        upstream_frames = outcome.upstream_frames,
        saw_usage = outcome.saw_usage,
    );
    Ok(outcome)
}

/// Realtime usage rides on `response.done` events.
fn observe_usage(text: &str, outcome: &mut TunnelOutcome) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    if value.get("type").and_then(Value::as_str) != Some("response.done") {
        return;
    }
    let Some(usage) = value.get("response").and_then(|r| r.get("usage")) else {
        return;
    };
    let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    if input == 0 && output == 0 {
        return;
    }
    outcome.usage.merge(Usage::new(input, output));
    outcome.saw_usage = true;
}

fn client_to_upstream(message: ClientMessage) -> UpstreamMessage {
    match message {
        ClientMessage::Text(text) => UpstreamMessage::text(text.as_str()),
        ClientMessage::Binary(data) => UpstreamMessage::binary(data),
        ClientMessage::Ping(data) => UpstreamMessage::Ping(data),
        ClientMessage::Pong(data) => UpstreamMessage::Pong(data),
        ClientMessage::Close(frame) => UpstreamMessage::Close(frame.map(close_to_upstream)),
    }
}

fn upstream_to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(close_to_client))),
        // Raw frames only surface with manual frame handling; not forwarded.
        UpstreamMessage::Frame(_) => None,
    }
}

fn close_to_upstream(frame: CloseFrame) -> UpstreamCloseFrame {
    UpstreamCloseFrame {
        code: CloseCode::from(frame.code),
        reason: frame.reason.as_str().to_string().into(),
    }
}

fn close_to_client(frame: UpstreamCloseFrame) -> CloseFrame {
    CloseFrame {
        code: frame.code.into(),
        reason: frame.reason.as_str().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_read_from_response_done() {
        let mut outcome = TunnelOutcome::default();
        observe_usage(
            r#"{"type":"response.done","response":{"usage":{"input_tokens":11,"output_tokens":22}}}"#,
            &mut outcome,
        );
        assert!(outcome.saw_usage);
        assert_eq!(outcome.usage.prompt_tokens, 11);
        assert_eq!(outcome.usage.completion_tokens, 22);
    }

    #[test]
    fn other_events_are_ignored() {
        let mut outcome = TunnelOutcome::default();
        observe_usage(r#"{"type":"response.output_text.delta","delta":"x"}"#, &mut outcome);
        observe_usage("not json", &mut outcome);
        assert!(!outcome.saw_usage);
    }
}
