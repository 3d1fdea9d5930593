//! `reqwest`-backed query backend.

use futures::TryStreamExt;
use reqwest::StatusCode;
use url::Url;

use super::{QueryBackend, QueryError, QueryRequest, ReplyStream};

/// Posts `{"query": ...}` as JSON to the configured endpoint.
#[derive(Clone)]
pub struct HttpQueryBackend {
    http: reqwest::Client,
    endpoint: Url,
}

impl std::fmt::Debug for HttpQueryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQueryBackend")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl HttpQueryBackend {
    /// Create a backend for `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, QueryError> {
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: Url::parse(endpoint)?,
        })
    }

    /// The endpoint queries are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Success statuses whose responses never carry a body.
///
/// 304 is bodiless too but fails the success check first, so it surfaces as
/// `QueryError::Http`.
fn is_null_body_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT)
}

#[async_trait::async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn query(&self, query: &str) -> Result<ReplyStream, QueryError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&QueryRequest { query })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(QueryError::Http {
                status: status.as_u16(),
            });
        }
        if is_null_body_status(status) {
            return Err(QueryError::MissingBody);
        }

        tracing::debug!(
            status = status.as_u16(),
            content_length = ?resp.content_length(),
            "Chatbot response headers received"
        );

        Ok(Box::pin(resp.bytes_stream().map_err(QueryError::from)))
    }
}
