//! Axum server for the chat-completions gateway.

use super::GatewayConfig;
use super::protocol::{
    ChatCompletion, ChatCompletionRequest, ChunkBuilder, RequestMetadata, error_body,
    render_event,
};
use crate::agent::{AgentDefinition, GenerationContext};
use crate::config::GenerationConfig;
use crate::orchestrator::{ExtractionTracker, RunEvent, RunEventStream, with_extraction};
use crate::prompts::research_prompt;
use crate::session::{SessionMeta, SessionRecord, SessionRecorder, SessionStore};
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Everything a request handler needs.
pub struct AppState {
    pub agent: Arc<AgentDefinition>,
    pub gateway: GatewayConfig,
    pub generation: GenerationConfig,
    pub sessions: Option<SessionStore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        agent: Arc<AgentDefinition>,
        gateway: GatewayConfig,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            agent,
            gateway,
            generation,
            sessions: None,
        }
    }

    pub fn with_sessions(mut self, store: SessionStore) -> Self {
        self.sessions = Some(store);
        self
    }

    fn context(&self, metadata: Option<&RequestMetadata>) -> GenerationContext {
        let domain = metadata
            .and_then(|m| m.domain.clone())
            .unwrap_or_else(|| self.generation.default_domain.clone());
        let count = metadata
            .and_then(|m| m.num_hypotheses)
            .unwrap_or(self.generation.default_hypothesis_count);
        GenerationContext::new(domain, Some(count))
    }
}

/// One accepted generation request.
struct GenerationRun {
    idea: String,
    ctx: GenerationContext,
}

impl GenerationRun {
    fn events(&self, state: &AppState) -> RunEventStream {
        let upstream = state
            .agent
            .run_streamed(research_prompt(&self.idea), &self.ctx);
        let tracker = ExtractionTracker::new(self.ctx.hypothesis_count)
            .with_summary_chars(state.generation.summary_chars);
        with_extraction(upstream, tracker)
    }

    fn session_meta(&self, state: &AppState) -> SessionMeta {
        SessionMeta {
            domain: self.ctx.domain.clone(),
            num_hypotheses: self.ctx.hypothesis_count,
            research_idea: self.idea.clone(),
            provider: state.agent.provider().provider_name().to_string(),
            model_name: state.agent.provider().model_name().to_string(),
        }
    }
}

/// Build the gateway router.
pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(&state.gateway.cors_origins);
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn chat_completions_handler(
    State(state): State<SharedState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let Some(idea) = request.research_idea() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_body("No user message found", "invalid_request_error")),
        )
            .into_response();
    };

    let run = GenerationRun {
        idea: idea.to_string(),
        ctx: state.context(request.metadata.as_ref()),
    };
    info!(
        domain = %run.ctx.domain,
        count = ?run.ctx.hypothesis_count,
        stream = request.stream,
        "Generation requested"
    );

    if request.stream {
        stream_response(state, run)
    } else {
        complete_response(state, run, request.model).await
    }
}

fn stream_response(state: SharedState, run: GenerationRun) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(stream_run(state, run, tx));

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ];
    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default());
    (headers, sse).into_response()
}

/// Drive one run into SSE events. Returns early once the client is gone,
/// which drops the run and cancels the agent.
async fn stream_run(
    state: SharedState,
    run: GenerationRun,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let chunks = ChunkBuilder::new(&state.gateway.model_id);
    if !send_json(&tx, &chunks.role()).await {
        return;
    }

    let mut events = run.events(&state);
    let mut recorder = SessionRecorder::new();
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                recorder.observe(&event);
                let Some(text) = render_event(&event) else {
                    continue;
                };
                if !send_json(&tx, &chunks.content(text)).await {
                    debug!(id = %chunks.id(), "Client disconnected, abandoning run");
                    return;
                }
            }
            Err(e) => {
                warn!(id = %chunks.id(), error = %e, "Generation failed mid-stream");
                if send_json(&tx, &error_body(e.to_string(), "server_error")).await {
                    send_done(&tx).await;
                }
                return;
            }
        }
    }

    if !send_json(&tx, &chunks.stop()).await || !send_done(&tx).await {
        return;
    }
    persist(&state, recorder.into_record(run.session_meta(&state))).await;
}

async fn send_json(tx: &mpsc::Sender<Result<Event, Infallible>>, payload: &impl Serialize) -> bool {
    let data = match serde_json::to_string(payload) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Failed to serialize SSE payload");
            return false;
        }
    };
    tx.send(Ok(Event::default().data(data))).await.is_ok()
}

async fn send_done(tx: &mpsc::Sender<Result<Event, Infallible>>) -> bool {
    tx.send(Ok(Event::default().data("[DONE]"))).await.is_ok()
}

async fn complete_response(state: SharedState, run: GenerationRun, model: String) -> Response {
    let mut events = run.events(&state);
    let mut recorder = SessionRecorder::new();
    let mut final_message = None;
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if let RunEvent::Message { data } = &event {
                    final_message = Some(data.clone());
                }
                recorder.observe(&event);
            }
            Err(e) => {
                warn!(error = %e, "Generation failed");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(error_body(e.to_string(), "server_error")),
                )
                    .into_response();
            }
        }
    }

    let content = final_message.unwrap_or_else(|| recorder.raw_output().to_string());
    persist(&state, recorder.into_record(run.session_meta(&state))).await;
    Json(ChatCompletion::new(model, content)).into_response()
}

/// Save a finished run. Failures are logged and never reach the client.
async fn persist(state: &AppState, record: SessionRecord) {
    let Some(store) = state.sessions.clone() else {
        return;
    };
    let saved = tokio::task::spawn_blocking(move || {
        let mut record = record;
        store.save(&mut record)
    })
    .await;
    match saved {
        Ok(Ok(path)) => debug!(path = %path.display(), "Session persisted"),
        Ok(Err(e)) => warn!(error = %e, "Failed to persist session"),
        Err(e) => warn!(error = %e, "Session persistence task failed"),
    }
}

/// Serve the gateway on the configured address until cancelled.
pub async fn run(state: SharedState) -> Result<(), std::io::Error> {
    let addr = state.gateway.bind_addr();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
