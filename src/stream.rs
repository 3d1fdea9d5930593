//! Incremental consumption of a streamed reply body.
//!
//! [`StreamConsumer`] decodes bytes as UTF-8 as they arrive and writes the
//! accumulated text into the agent placeholder of one exchange. Multi-byte
//! characters split across chunk boundaries are held back by the decoder
//! until the rest of the sequence arrives.

use bytes::Bytes;
use encoding_rs::{CoderResult, Decoder, UTF_8};
use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::query::QueryError;
use crate::session::Conversation;

/// Writes one exchange's reply into its placeholder, chunk by chunk.
pub struct StreamConsumer {
    conversation: Conversation,
    exchange_id: Uuid,
    decoder: Decoder,
    accumulated: String,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("conversation", &self.conversation.id())
            .field("exchange_id", &self.exchange_id)
            .field("accumulated_len", &self.accumulated.len())
            .finish()
    }
}

impl StreamConsumer {
    /// Create a consumer for the placeholder owned by `exchange_id`.
    #[must_use]
    pub fn new(conversation: Conversation, exchange_id: Uuid) -> Self {
        Self {
            conversation,
            exchange_id,
            decoder: UTF_8.new_decoder(),
            accumulated: String::new(),
        }
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// Decode one chunk and publish the accumulated text.
    ///
    /// Returns the full text accumulated so far.
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        let decoded = self.decode(chunk, false);
        self.apply(&decoded);
        &self.accumulated
    }

    /// Flush the decoder and mark the exchange complete.
    ///
    /// A trailing incomplete sequence is replaced with U+FFFD.
    pub fn finish(mut self) -> String {
        let tail = self.decode(&[], true);
        self.apply(&tail);
        self.conversation.complete_exchange(self.exchange_id);
        self.accumulated
    }

    /// Drive `stream` to completion, applying chunks in arrival order.
    ///
    /// On a read error the exchange is left streaming so the caller can fail
    /// it with a visible error.
    pub async fn consume<S>(mut self, stream: S) -> Result<String, QueryError>
    where
        S: Stream<Item = Result<Bytes, QueryError>>,
    {
        futures::pin_mut!(stream);
        let mut chunks = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            chunks += 1;
            self.push(&chunk);
            tracing::trace!(
                exchange_id = %self.exchange_id,
                chunk_len = chunk.len(),
                total_len = self.accumulated.len(),
                "Reply chunk applied"
            );
        }
        tracing::debug!(exchange_id = %self.exchange_id, chunks, "Reply stream ended");
        Ok(self.finish())
    }

    fn apply(&mut self, decoded: &str) {
        if decoded.is_empty() {
            return;
        }
        self.accumulated.push_str(decoded);
        if !self
            .conversation
            .set_reply(self.exchange_id, &self.accumulated)
        {
            tracing::warn!(
                exchange_id = %self.exchange_id,
                "Placeholder no longer accepts updates"
            );
        }
    }

    fn decode(&mut self, mut src: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len());
            out.reserve(needed);
            let (result, read, _had_replacements) = self.decoder.decode_to_string(src, &mut out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => {}
            }
        }
    }
}
