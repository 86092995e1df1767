use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use modelgate_core::{
    AuthContext, RelayBody, RelayEngine, RelayFormat, RelayRequest, RelayResponse, TokenAuth,
};
use modelgate_protocol::envelope;

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<RelayEngine>,
    pub auth: Arc<TokenAuth>,
}

#[derive(Clone)]
struct RequestTraceId(String);

pub fn relay_router(state: RouterState) -> Router {
    Router::new()
        // OpenAI dialects
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/rerank", post(rerank))
        .route("/v1/images/generations", post(images_generations))
        .route("/v1/images/edits", post(images_edits))
        .route("/v1/audio/speech", post(audio_speech))
        .route("/v1/audio/transcriptions", post(audio_transcriptions))
        .route("/v1/audio/translations", post(audio_translations))
        .route("/v1/responses", post(responses))
        // Anthropic dialect
        .route("/v1/messages", post(messages))
        // Gemini dialect (model and verb share one path segment)
        .route("/v1beta/models/{*model_verb}", post(generate_content))
        // Realtime WebSocket
        .route("/v1/realtime", get(realtime))
        // Async task dialect
        .route("/v1/videos", post(task_submit))
        .route("/v1/videos/{task_id}", get(task_fetch))
        .layer(middleware::from_fn_with_state(state.clone(), token_auth))
        .with_state(state)
}

/// Token auth for every relay route. Successful auth attaches the
/// `AuthContext` and a per-request trace id; failures answer in the chat
/// error envelope regardless of dialect, matching the pre-dispatch stage.
async fn token_auth(
    State(state): State<RouterState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let query_key = query_param(request.uri().query(), "key");
    let client_ip = forwarded_ip(request.headers()).or(Some(peer.ip()));

    match state
        .auth
        .authenticate(request.headers(), &path, query_key.as_deref(), client_ip)
    {
        Ok(auth) => {
            let trace_id = Uuid::new_v4().to_string();
            info!(
                event = "request_authenticated",
                trace_id = %trace_id,
                user_id = auth.user_id,
                token_id = auth.token_id,
                path = %path,
            );
            request.extensions_mut().insert(auth);
            request.extensions_mut().insert(RequestTraceId(trace_id));
            next.run(request).await
        }
        Err(err) => {
            let body = envelope::chat_error(&err.message, "invalid_request_error", "unauthorized");
            json_response(err.status, &body)
        }
    }
}

async fn chat_completions(
    State(state): State<RouterState>,
    request: Request,
) -> Response {
    relay(state, request, RelayFormat::Chat, None, None).await
}

async fn embeddings(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Embeddings, None, None).await
}

async fn rerank(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Rerank, None, None).await
}

async fn images_generations(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Image, None, None).await
}

async fn images_edits(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Image, None, Some("edits")).await
}

async fn audio_speech(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Audio, None, Some("speech")).await
}

async fn audio_transcriptions(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Audio, None, Some("transcriptions")).await
}

async fn audio_translations(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Audio, None, Some("translations")).await
}

async fn responses(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Responses, None, None).await
}

async fn messages(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Messages, None, None).await
}

async fn generate_content(
    State(state): State<RouterState>,
    Path(model_verb): Path<String>,
    request: Request,
) -> Response {
    let (model, verb) = match model_verb.split_once(':') {
        Some((model, verb)) => (model.to_string(), verb.to_string()),
        None => (model_verb, "generateContent".to_string()),
    };
    relay(
        state,
        request,
        RelayFormat::GenerateContent,
        Some(model),
        Some(verb.as_str()),
    )
    .await
}

async fn task_submit(State(state): State<RouterState>, request: Request) -> Response {
    relay(state, request, RelayFormat::Task, None, None).await
}

async fn task_fetch(
    State(state): State<RouterState>,
    Path(task_id): Path<String>,
    request: Request,
) -> Response {
    relay(state, request, RelayFormat::Task, Some(task_id), Some("fetch")).await
}

async fn realtime(
    State(state): State<RouterState>,
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let trace_id = trace_id_of(&request);
    let model = params.get("model").cloned();
    let headers = request.headers().clone();
    let engine = state.engine.clone();
    ws.protocols(["realtime"]).on_upgrade(move |socket| async move {
        let relay_request = RelayRequest {
            format: RelayFormat::Realtime,
            auth,
            headers,
            body: Bytes::new(),
            path_model: model,
            action: None,
            trace_id,
        };
        engine.handle_realtime(socket, relay_request).await;
    })
}

async fn relay(
    state: RouterState,
    request: Request,
    format: RelayFormat,
    path_model: Option<String>,
    action: Option<&str>,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let trace_id = trace_id_of(&request);
    let headers = request.headers().clone();
    // Buffer at most one byte past the 413 threshold; the engine turns the
    // overflow into the dialect-appropriate 413.
    let limit = state.engine.max_body_bytes().saturating_add(1);
    let body = match axum::body::to_bytes(request.into_body(), limit).await {
        Ok(body) => body,
        Err(err) => {
            let envelope = envelope::chat_error(
                &format!("failed to read request body: {err}"),
                "invalid_request_error",
                "request_body_too_large",
            );
            return json_response(StatusCode::PAYLOAD_TOO_LARGE, &envelope);
        }
    };

    let relay_request = RelayRequest {
        format,
        auth,
        headers,
        body,
        path_model,
        action: action.map(str::to_string),
        trace_id,
    };
    into_axum_response(state.engine.handle(relay_request).await)
}

fn into_axum_response(response: RelayResponse) -> Response {
    let mut out = match response.body {
        RelayBody::Bytes(bytes) => Response::new(Body::from(bytes)),
        RelayBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
            Response::new(Body::from_stream(stream))
        }
    };
    *out.status_mut() = response.status;
    for (name, value) in &response.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            continue;
        };
        out.headers_mut().insert(name, value);
    }
    out
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
}

fn trace_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestTraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

fn forwarded_ip(headers: &HeaderMap) -> Option<std::net::IpAddr> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    forwarded.split(',').next()?.trim().parse().ok()
}
