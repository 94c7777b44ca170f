//! HTTP surface (§6): thin axum handlers over [`sim_core::Engine`]. JSON (de)serialization and
//! HTTP framing are the "shallow plumbing" the spec treats as an external collaborator (§1) — the
//! interesting behavior (admission, pacing, LoRA lifecycle) all lives in `sim-core`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use sim_common::{Config, SimError};
use sim_core::{
    ChatCompletionRequest, CompletionRequest, Engine, RequestKind, StreamFrame, TextCompletionRequest,
};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
}

/// Builds the full router over a started [`Engine`]. Callers are responsible for calling
/// `sim_core::rng::init` before the first request can arrive.
pub fn app(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(text_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/load_lora_adapter", post(load_lora_adapter))
        .route("/v1/unload_lora_adapter", post(unload_lora_adapter))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({}))
}

async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        sim_obs::render(),
    )
}

async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return SimError::ParseError.into_response(),
    };
    let wants_stream = req.stream;
    let request = CompletionRequest::Chat(req);

    if wants_stream {
        stream_response(&state, request, RequestKind::Chat).await
    } else {
        unary_response(&state, request, RequestKind::Chat).await
    }
}

async fn text_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let req: TextCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return SimError::ParseError.into_response(),
    };
    let wants_stream = req.stream;
    let request = CompletionRequest::Text(req);

    if wants_stream {
        stream_response(&state, request, RequestKind::Text).await
    } else {
        unary_response(&state, request, RequestKind::Text).await
    }
}

async fn unary_response(state: &AppState, request: CompletionRequest, kind: RequestKind) -> Response {
    match state.engine.submit_unary(request, kind).await {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn stream_response(state: &AppState, request: CompletionRequest, kind: RequestKind) -> Response {
    let (ready, frames) = match state.engine.submit_stream(request, kind).await {
        Ok(v) => v,
        Err(err) => return err.into_response(),
    };
    // Wait for a worker to pick the request up before the SSE headers go out, so the
    // time-to-first-chunk a client observes isn't inflated by queueing (§4.8).
    let _ = ready.await;

    let stream = ReceiverStream::new(frames).map(|frame| {
        let event = match frame {
            StreamFrame::Chunk(value) => Event::default().data(value.to_string()),
            StreamFrame::Error(err) => {
                Event::default().data(serde_json::to_string(&err.envelope()).unwrap_or_default())
            }
            StreamFrame::Done => Event::default().data("[DONE]"),
        };
        Ok::<Event, Infallible>(event)
    });
    Sse::new(stream).into_response()
}

fn unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn model_entry(id: &str, root: &str, parent: Option<&str>, created: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": "model",
        "created": created,
        "owned_by": "vllm",
        "root": root,
        "parent": parent,
    })
}

fn models_payload(config: &Config, loaded_loras: &[String]) -> serde_json::Value {
    let created = unix_seconds();
    let mut data: Vec<serde_json::Value> = config
        .served_model_names
        .iter()
        .map(|name| model_entry(name, name, None, created))
        .collect();
    let base = config.display_model();
    for lora in loaded_loras {
        data.push(model_entry(lora, lora, Some(base), created));
    }
    serde_json::json!({ "object": "list", "data": data })
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let loaded = state.engine.lora().list_loaded();
    Json(models_payload(state.engine.config(), &loaded))
}

#[derive(serde::Deserialize)]
struct LoraAdapterRequest {
    lora_name: String,
    #[serde(default)]
    #[allow(dead_code)]
    lora_path: Option<String>,
}

async fn load_lora_adapter(State(state): State<AppState>, body: Bytes) -> Response {
    let req: LoraAdapterRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return SimError::ParseError.into_response(),
    };
    state.engine.lora().load(req.lora_name.clone());
    (
        StatusCode::OK,
        format!("Success: LoRA adapter '{}' added successfully.", req.lora_name),
    )
        .into_response()
}

async fn unload_lora_adapter(State(state): State<AppState>, body: Bytes) -> Response {
    let req: LoraAdapterRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return SimError::ParseError.into_response(),
    };
    if state.engine.lora().unload(&req.lora_name) {
        (
            StatusCode::OK,
            format!("Success: LoRA adapter '{}' removed successfully.", req.lora_name),
        )
            .into_response()
    } else {
        SimError::InvalidRequest(format!(
            "The lora adapter `{}` cannot be found.",
            req.lora_name
        ))
        .into_response()
    }
}
