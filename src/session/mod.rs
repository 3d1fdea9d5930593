//! Per-page conversation state.
//!
//! Each load of the chat page gets its own [`Conversation`], identified by
//! UUID and held in a [`ConversationStore`] for the lifetime of the page.
//!
//! # Example
//!
//! ```rust
//! use searchuoft_chat::session::ConversationStore;
//!
//! let store = ConversationStore::new();
//! let conversation = store.create();
//! let exchange = conversation.begin_exchange("Where is Robarts?");
//! conversation.set_reply(exchange, "St. George Street.");
//!
//! assert_eq!(conversation.messages().len(), 2);
//! ```

mod conversation;

pub use conversation::{Conversation, ConversationStore};
