//! SearchUofT chat front-end.
//!
//! A server-rendered chat page: the user submits a query, the reply from the
//! chatbot service streams back and is rendered incrementally into a
//! message list.
//!
//! # Architecture
//!
//! - **Server**: Axum router serving the page, the query form endpoint, and
//!   an SSE stream of re-rendered message lists
//! - **UI**: minijinja templates + HTMX (`sse` extension), no client-side state
//!
//! # Modules
//!
//! - [`message`]: the chat message model
//! - [`session`]: per-page conversations and their store
//! - [`query`]: the chatbot backend seam and its HTTP implementation
//! - [`stream`]: incremental decoding of a streamed reply
//! - [`controller`]: turns a submitted query into an exchange
//! - [`render`]: HTML templates
//! - [`server`]: routing and handlers

#![allow(clippy::missing_fields_in_debug)]

pub mod config;
pub mod controller;
pub mod message;
pub mod query;
pub mod render;
pub mod server;
pub mod session;
pub mod stream;

use std::sync::Arc;

use crate::config::UiConfig;
use crate::controller::QueryController;
use crate::query::QueryBackend;
use crate::render::Renderer;
use crate::session::ConversationStore;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live conversations, one per loaded page.
    pub conversations: ConversationStore,
    /// Starts exchanges against the chatbot service.
    pub controller: QueryController,
    /// Page and fragment templates.
    pub renderer: Renderer,
}

impl AppState {
    /// Wire up state around `backend`.
    pub fn new(ui: UiConfig, backend: Arc<dyn QueryBackend>) -> Result<Self, minijinja::Error> {
        Ok(Self {
            conversations: ConversationStore::new(),
            controller: QueryController::new(backend),
            renderer: Renderer::new(ui)?,
        })
    }
}
