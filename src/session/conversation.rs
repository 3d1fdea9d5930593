//! Conversation state and the store holding one conversation per page session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::message::{ChatMessage, Role};

/// The message sequence of a single page session.
///
/// Messages are append-only. The only in-place mutation is the content of an
/// agent placeholder, and only while its exchange is still streaming.
#[derive(Debug)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

#[derive(Debug)]
struct ConversationInner {
    id: String,
    messages: RwLock<Vec<ChatMessage>>,
    /// Exchanges whose placeholder may still be written to.
    streaming: RwLock<HashSet<Uuid>>,
    last_activity: RwLock<DateTime<Utc>>,
    /// Bumped on every change so renderers know to refresh.
    revision: watch::Sender<u64>,
}

impl Clone for Conversation {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Conversation {
    fn new(id: String) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ConversationInner {
                id,
                messages: RwLock::new(Vec::new()),
                streaming: RwLock::new(HashSet::new()),
                last_activity: RwLock::new(Utc::now()),
                revision,
            }),
        }
    }

    /// Get the conversation ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append the user's message and an empty agent placeholder.
    ///
    /// Both are pushed under one lock so no other exchange can interleave
    /// between them. Returns the new exchange's ID.
    pub fn begin_exchange(&self, query: impl Into<String>) -> Uuid {
        let exchange_id = Uuid::new_v4();
        {
            let mut guard = self.inner.messages.write().unwrap();
            guard.push(ChatMessage::user(query));
            guard.push(ChatMessage::agent_placeholder(exchange_id));
        }
        self.inner.streaming.write().unwrap().insert(exchange_id);
        self.changed();
        exchange_id
    }

    /// Replace the content of the placeholder owned by `exchange_id`.
    ///
    /// Returns `false` if the exchange is unknown or already finished, in
    /// which case nothing is modified.
    pub fn set_reply(&self, exchange_id: Uuid, content: &str) -> bool {
        if !self.is_streaming(exchange_id) {
            return false;
        }

        let updated = {
            let mut guard = self.inner.messages.write().unwrap();
            match guard
                .iter_mut()
                .rev()
                .find(|m| m.role == Role::Agent && m.exchange_id == Some(exchange_id))
            {
                Some(message) => {
                    content.clone_into(&mut message.content);
                    true
                }
                None => false,
            }
        };

        if updated {
            self.changed();
        }
        updated
    }

    /// Mark an exchange finished. Its placeholder becomes immutable.
    pub fn complete_exchange(&self, exchange_id: Uuid) {
        if self.inner.streaming.write().unwrap().remove(&exchange_id) {
            settle_placeholder(&mut self.inner.messages.write().unwrap(), exchange_id);
            self.changed();
        }
    }

    /// Finish an exchange with an error note appended to the sequence.
    pub fn fail_exchange(&self, exchange_id: Uuid, error: impl Into<String>) {
        self.inner.streaming.write().unwrap().remove(&exchange_id);
        {
            let mut guard = self.inner.messages.write().unwrap();
            settle_placeholder(&mut guard, exchange_id);
            guard.push(ChatMessage::error(exchange_id, error));
        }
        self.changed();
    }

    /// Whether the given exchange is still streaming.
    #[must_use]
    pub fn is_streaming(&self, exchange_id: Uuid) -> bool {
        self.inner.streaming.read().unwrap().contains(&exchange_id)
    }

    /// Whether any exchange is still streaming.
    #[must_use]
    pub fn has_active_exchanges(&self) -> bool {
        !self.inner.streaming.read().unwrap().is_empty()
    }

    /// Snapshot of all messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.messages.read().unwrap().clone()
    }

    /// Get the number of messages in the conversation.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.messages.read().unwrap().len()
    }

    /// Current revision number.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Watch for revision changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Number of open revision subscriptions (one per connected page).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.revision.receiver_count()
    }

    /// Check if the conversation has been idle longer than `timeout`.
    ///
    /// A conversation with an exchange in flight or a page still subscribed
    /// never counts as idle.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.has_active_exchanges() || self.subscriber_count() > 0 {
            return false;
        }
        let last = *self.inner.last_activity.read().unwrap();
        match (Utc::now() - last).to_std() {
            Ok(idle) => idle > timeout,
            // Clock went backwards.
            Err(_) => false,
        }
    }

    fn changed(&self) {
        *self.inner.last_activity.write().unwrap() = Utc::now();
        self.inner.revision.send_modify(|r| *r += 1);
    }
}

/// Clear the streaming flag on the placeholder owned by `exchange_id`.
fn settle_placeholder(messages: &mut [ChatMessage], exchange_id: Uuid) {
    if let Some(message) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Agent && m.exchange_id == Some(exchange_id))
    {
        message.streaming = false;
    }
}

/// Thread-safe store for conversations.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new, empty conversation and return it.
    #[must_use]
    pub fn create(&self) -> Conversation {
        let conversation = Conversation::new(Uuid::new_v4().to_string());
        self.inner
            .write()
            .unwrap()
            .insert(conversation.id().to_string(), conversation.clone());
        conversation
    }

    /// Get a conversation by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.inner.read().unwrap().get(id).cloned()
    }

    /// Remove a conversation by ID.
    pub fn remove(&self, id: &str) -> Option<Conversation> {
        self.inner.write().unwrap().remove(id)
    }

    /// Get the number of live conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Check if there are no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove conversations that have been idle longer than the timeout.
    ///
    /// Returns the number of conversations removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self.inner.write().unwrap();
        let before = guard.len();
        guard.retain(|_, c| !c.is_expired_with_timeout(timeout));
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_exchange_appends_user_and_placeholder() {
        let store = ConversationStore::new();
        let conversation = store.create();

        let exchange = conversation.begin_exchange("What is UofT?");
        let messages = conversation.messages();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "What is UofT?");
        assert_eq!(messages[1].role, Role::Agent);
        assert_eq!(messages[1].content, "");
        assert_eq!(messages[1].exchange_id, Some(exchange));
        assert!(conversation.is_streaming(exchange));
    }

    #[test]
    fn test_empty_query_is_kept_as_is() {
        let conversation = ConversationStore::new().create();
        conversation.begin_exchange("");
        assert_eq!(conversation.messages()[0].content, "");
    }

    #[test]
    fn test_set_reply_targets_own_placeholder() {
        let conversation = ConversationStore::new().create();
        let first = conversation.begin_exchange("one");
        let second = conversation.begin_exchange("two");

        assert!(conversation.set_reply(first, "reply one"));
        assert!(conversation.set_reply(second, "reply two"));

        let messages = conversation.messages();
        assert_eq!(messages[1].content, "reply one");
        assert_eq!(messages[3].content, "reply two");
    }

    #[test]
    fn test_completed_exchange_is_immutable() {
        let conversation = ConversationStore::new().create();
        let exchange = conversation.begin_exchange("q");
        assert!(conversation.set_reply(exchange, "done"));
        conversation.complete_exchange(exchange);

        assert!(!conversation.set_reply(exchange, "overwritten"));
        assert_eq!(conversation.messages()[1].content, "done");
    }

    #[test]
    fn test_fail_exchange_appends_error() {
        let conversation = ConversationStore::new().create();
        let exchange = conversation.begin_exchange("q");
        conversation.fail_exchange(exchange, "upstream returned HTTP 500");

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, Role::Error);
        assert_eq!(messages[2].exchange_id, Some(exchange));
        assert!(!conversation.has_active_exchanges());
    }

    #[test]
    fn test_revision_increments_on_change() {
        let conversation = ConversationStore::new().create();
        let rx = conversation.subscribe();
        assert_eq!(conversation.revision(), 0);

        let exchange = conversation.begin_exchange("q");
        conversation.set_reply(exchange, "a");
        assert_eq!(conversation.revision(), 2);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_store_cleanup_keeps_streaming_conversations() {
        let store = ConversationStore::new();
        let idle = store.create();
        let busy = store.create();
        busy.begin_exchange("still going");
        std::thread::sleep(Duration::from_millis(5));

        let removed = store.cleanup_expired_with_timeout(Duration::from_millis(1));

        assert_eq!(removed, 1);
        assert!(store.get(idle.id()).is_none());
        assert!(store.get(busy.id()).is_some());
    }

    #[test]
    fn test_store_cleanup_keeps_subscribed_conversations() {
        let store = ConversationStore::new();
        let watched = store.create();
        let rx = watched.subscribe();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.cleanup_expired_with_timeout(Duration::from_millis(1)), 0);
        assert!(store.get(watched.id()).is_some());

        drop(rx);
        assert_eq!(store.cleanup_expired_with_timeout(Duration::from_millis(1)), 1);
        assert!(store.get(watched.id()).is_none());
    }

    #[test]
    fn test_finished_exchanges_stop_streaming() {
        let conversation = ConversationStore::new().create();
        let done = conversation.begin_exchange("empty reply");
        let failed = conversation.begin_exchange("broken");

        conversation.complete_exchange(done);
        conversation.fail_exchange(failed, "chatbot service returned HTTP 500");

        let messages = conversation.messages();
        assert!(!messages[1].streaming);
        assert!(!messages[1].is_pending());
        assert!(!messages[3].streaming);
        assert!(!messages[3].is_pending());
    }

    #[test]
    fn test_store_lifecycle() {
        let store = ConversationStore::new();
        assert!(store.is_empty());

        let conversation = store.create();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(conversation.id()).unwrap().id(), conversation.id());

        store.remove(conversation.id());
        assert!(store.is_empty());
    }
}
