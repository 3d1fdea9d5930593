//! Client side of the chatbot query endpoint.
//!
//! The [`QueryBackend`] trait is the seam between the form controller and
//! the remote service. [`HttpQueryBackend`] is the production implementation;
//! tests substitute scripted backends.

pub mod http;

pub use http::HttpQueryBackend;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;

/// Failure of a single query exchange.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The service answered with a non-success status.
    #[error("chatbot service returned HTTP {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// The response carried no readable body.
    #[error("chatbot service returned no response body")]
    MissingBody,

    /// Connecting, sending, or reading the body failed.
    #[error("request to chatbot service failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The configured endpoint is not a valid URL.
    #[error("invalid chatbot URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// Streamed response body, chunk by chunk in arrival order.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes, QueryError>> + Send>>;

/// JSON payload sent to the chatbot service.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
}

/// Sends a query and returns the streamed reply body.
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync + std::fmt::Debug {
    /// Issue the request and return once response headers are in.
    ///
    /// Status and body checks happen here, so a returned stream is always
    /// a successful response's body.
    async fn query(&self, query: &str) -> Result<ReplyStream, QueryError>;
}
