//! Server-side HTML rendering.
//!
//! Templates are compiled into the binary and rendered with `minijinja`.
//! Names end in `.html`, so every interpolated value is HTML-escaped.
//!
//! # Templates
//!
//! - `message.html`: one chat bubble (macro)
//! - `messages.html`: the ordered message list
//! - `query_form.html`: the query input form
//! - `query_response.html`: a fresh form plus an out-of-band list refresh
//! - `index.html`: the full chat page
//! - `not_found.html`: the not-found view

use std::sync::Arc;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::config::UiConfig;
use crate::message::ChatMessage;

const TEMPLATES: &[(&str, &str)] = &[
    ("message.html", include_str!("../templates/message.html")),
    ("messages.html", include_str!("../templates/messages.html")),
    ("query_form.html", include_str!("../templates/query_form.html")),
    ("query_response.html", include_str!("../templates/query_response.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("not_found.html", include_str!("../templates/not_found.html")),
];

/// Display form of a [`ChatMessage`].
#[derive(Debug, Serialize)]
struct MessageView<'a> {
    role: crate::message::Role,
    kind: &'static str,
    content: &'a str,
    time: String,
    pending: bool,
}

impl<'a> From<&'a ChatMessage> for MessageView<'a> {
    fn from(m: &'a ChatMessage) -> Self {
        Self {
            role: m.role,
            kind: m.role.as_str(),
            content: &m.content,
            time: m.timestamp.format("%H:%M:%S").to_string(),
            pending: m.is_pending(),
        }
    }
}

/// Script locations referenced by the page shell.
#[derive(Debug, Serialize)]
struct Assets<'a> {
    htmx: &'a str,
    htmx_sse: &'a str,
}

/// Renders pages and fragments from the compiled-in templates.
#[derive(Debug, Clone)]
pub struct Renderer {
    env: Arc<Environment<'static>>,
    ui: Arc<UiConfig>,
}

impl Renderer {
    /// Compile all templates.
    pub fn new(ui: UiConfig) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_debug(cfg!(debug_assertions));
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self {
            env: Arc::new(env),
            ui: Arc::new(ui),
        })
    }

    /// The full chat page for a conversation.
    pub fn page(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("index.html")?.render(context! {
            conversation_id,
            messages => views(messages),
            assets => Assets {
                htmx: &self.ui.htmx_url,
                htmx_sse: &self.ui.htmx_sse_url,
            },
        })
    }

    /// The message list fragment.
    pub fn messages(&self, messages: &[ChatMessage]) -> Result<String, minijinja::Error> {
        self.env
            .get_template("messages.html")?
            .render(context! { messages => views(messages) })
    }

    /// Response to a submitted query: an empty form and the current list.
    pub fn query_response(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("query_response.html")?.render(context! {
            conversation_id,
            messages => views(messages),
        })
    }

    /// The not-found view.
    pub fn not_found(&self) -> Result<String, minijinja::Error> {
        self.env.get_template("not_found.html")?.render(context! {})
    }
}

fn views(messages: &[ChatMessage]) -> Vec<MessageView<'_>> {
    messages.iter().map(MessageView::from).collect()
}
