//! Query form controller.
//!
//! Turns a submitted query into an exchange: the user message and agent
//! placeholder are appended synchronously, then the request and stream
//! consumption run on a background task.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::query::{QueryBackend, QueryError};
use crate::session::Conversation;
use crate::stream::StreamConsumer;

/// Handle to an exchange started by [`QueryController::submit`].
#[derive(Debug)]
pub struct SubmittedExchange {
    /// ID of the exchange's agent placeholder.
    pub id: Uuid,
    /// Background task driving the request to completion.
    pub task: JoinHandle<()>,
}

/// Starts exchanges against a [`QueryBackend`].
#[derive(Debug, Clone)]
pub struct QueryController {
    backend: Arc<dyn QueryBackend>,
}

impl QueryController {
    #[must_use]
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Append the query to `conversation` and start streaming the reply.
    ///
    /// The query is sent as-is, including when empty. Must be called from
    /// within a Tokio runtime.
    pub fn submit(&self, conversation: &Conversation, query: String) -> SubmittedExchange {
        let id = conversation.begin_exchange(query.clone());

        tracing::info!(
            name: "exchange.started",
            conversation_id = %conversation.id(),
            exchange_id = %id,
            query_len = query.len(),
            "Exchange started"
        );

        let backend = Arc::clone(&self.backend);
        let conversation = conversation.clone();
        let task = tokio::spawn(async move {
            run_exchange(backend.as_ref(), conversation, id, &query).await;
        });

        SubmittedExchange { id, task }
    }
}

/// Drive one exchange. Failures end up as an error message in the
/// conversation.
async fn run_exchange(
    backend: &dyn QueryBackend,
    conversation: Conversation,
    exchange_id: Uuid,
    query: &str,
) {
    let started = Instant::now();
    let result: Result<String, QueryError> = async {
        let body = backend.query(query).await?;
        StreamConsumer::new(conversation.clone(), exchange_id)
            .consume(body)
            .await
    }
    .await;

    match result {
        Ok(reply) => {
            tracing::info!(
                name: "exchange.completed",
                conversation_id = %conversation.id(),
                exchange_id = %exchange_id,
                reply_len = reply.len(),
                elapsed = ?started.elapsed(),
                "Exchange completed"
            );
        }
        Err(e) => {
            tracing::error!(
                name: "exchange.failed",
                conversation_id = %conversation.id(),
                exchange_id = %exchange_id,
                error = %e,
                "Exchange failed"
            );
            conversation.fail_exchange(exchange_id, e.to_string());
        }
    }
}
