//! Data models for the chat service.
//!
//! This module contains the data structures exchanged with the server:
//!
//! - `UserProfile`, `NewAccount`: Account identity and registration payloads
//! - `Conversation`, `Message`, `Folder`, `Tag`: Conversation organization

pub mod conversation;
mod timestamp;
pub mod user;

pub use conversation::{
    Conversation, ConversationQuery, ConversationUpdate, Folder, Message, MessageRole,
    NewConversation, NewFolder, NewMessage, NewTag, Tag,
};
pub use timestamp::parse_timestamp;
pub use user::{CreatedAccount, NewAccount, UserProfile};
