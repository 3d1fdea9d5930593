use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::{AppConfig, SessionConfig};
use crate::query::HttpQueryBackend;
use crate::session::ConversationStore;

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let backend = HttpQueryBackend::new(&config.chatbot.url)?;
    info!(
        name: "chatbot.config.loaded",
        endpoint = %backend.endpoint(),
        "Chatbot endpoint configured"
    );

    let state = AppState::new(config.ui.clone(), Arc::new(backend))?;
    let _sweeper = spawn_sweeper(state.conversations.clone(), config.session.clone());

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/conversations/{id}/query", post(submit_query))
        .route("/conversations/{id}/events", get(conversation_events))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically evict idle conversations.
pub fn spawn_sweeper(store: ConversationStore, settings: SessionConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.sweep_interval());
        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired_with_timeout(settings.idle_timeout());
            if removed > 0 {
                tracing::debug!(
                    removed,
                    remaining = store.len(),
                    "Evicted idle conversations"
                );
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn render_failed(e: &minijinja::Error) -> (StatusCode, String) {
    tracing::error!(error = %e, "Template rendering failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to render page".to_string(),
    )
}

/// GET / - Chat page with a fresh conversation.
async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, String)> {
    let conversation = state.conversations.create();
    tracing::debug!(conversation_id = %conversation.id(), "Created conversation");

    state
        .renderer
        .page(conversation.id(), &conversation.messages())
        .map(Html)
        .map_err(|e| render_failed(&e))
}

/// Fallback - the not-found view.
async fn not_found(State(state): State<AppState>) -> Response {
    match state.renderer.not_found() {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(e) => render_failed(&e).into_response(),
    }
}

/// GET /health - Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Submitted query form.
#[derive(Debug, Deserialize)]
struct QueryForm {
    /// Raw query text. Missing is treated as empty.
    #[serde(default)]
    query: String,
}

/// Tells HTMX to reload the page, which starts a new conversation.
fn conversation_gone(id: &str) -> Response {
    tracing::warn!(conversation_id = %id, "Conversation not found");
    (
        StatusCode::NOT_FOUND,
        [("HX-Refresh", "true")],
        "Conversation expired",
    )
        .into_response()
}

/// POST /conversations/:id/query - Start an exchange.
async fn submit_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<QueryForm>,
) -> Response {
    let Some(conversation) = state.conversations.get(&id) else {
        return conversation_gone(&id);
    };

    let exchange = state.controller.submit(&conversation, form.query);
    tracing::debug!(
        conversation_id = %id,
        exchange_id = %exchange.id,
        message_count = conversation.message_count(),
        "Query accepted"
    );

    match state
        .renderer
        .query_response(conversation.id(), &conversation.messages())
    {
        Ok(html) => Html(html).into_response(),
        Err(e) => render_failed(&e).into_response(),
    }
}

enum Wake {
    Changed,
    KeepAlive,
}

/// GET /conversations/:id/events - SSE stream of rendered message lists.
async fn conversation_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(conversation) = state.conversations.get(&id) else {
        return conversation_gone(&id);
    };

    tracing::info!(conversation_id = %id, "Starting SSE stream");

    let renderer = state.renderer.clone();
    // The subscription keeps the conversation from being swept while the page is open.
    let mut revisions = conversation.subscribe();

    let sse_stream = async_stream::stream! {
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.tick().await;

        loop {
            // Mark seen before snapshotting so no change is missed.
            revisions.borrow_and_update();
            match renderer.messages(&conversation.messages()) {
                Ok(html) => yield Ok::<String, Infallible>(sse_event("messages", &html)),
                Err(e) => {
                    tracing::error!(conversation_id = %conversation.id(), error = %e, "Failed to render messages");
                    break;
                }
            }

            loop {
                let wake = tokio::select! {
                    changed = revisions.changed() => match changed {
                        Ok(()) => Wake::Changed,
                        Err(_) => return,
                    },
                    _ = keep_alive.tick() => Wake::KeepAlive,
                };
                match wake {
                    Wake::Changed => break,
                    Wake::KeepAlive => yield Ok::<String, Infallible>(": keep-alive\n\n".to_string()),
                }
            }
        }
    };

    build_sse_response(axum::body::Body::from_stream(sse_stream))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Format a named SSE event. Multi-line data is split into `data:` lines.
///
/// CR, LF and CRLF all end a line in the event-stream format, so each of
/// them starts a new `data:` line.
pub fn sse_event(event: &str, data: &str) -> String {
    let data = data.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = format!("event: {event}\n");
    for line in data.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

fn build_sse_response(body: axum::body::Body) -> Response {
    (
        [
            ("Content-Type", "text/event-stream"),
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("X-Accel-Buffering", "no"),
        ],
        body,
    )
        .into_response()
}
