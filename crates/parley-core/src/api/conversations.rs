//! Conversation, folder, and tag endpoints.
//!
//! Everything here goes through [`AuthenticatedClient`], so expired access
//! tokens are refreshed without the caller noticing.

use crate::models::{
    Conversation, ConversationQuery, ConversationUpdate, Folder, Message, NewConversation,
    NewFolder, NewMessage, NewTag, Tag,
};

use super::interceptor::{AuthenticatedClient, Transport};
use super::ApiError;

const CONVERSATIONS_PATH: &str = "/api/conversations";

impl<T: Transport> AuthenticatedClient<T> {
    pub async fn list_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>, ApiError> {
        self.get_json_with_query(CONVERSATIONS_PATH, query).await
    }

    pub async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation, ApiError> {
        self.post_json(CONVERSATIONS_PATH, conversation).await
    }

    pub async fn update_conversation(
        &self,
        conversation_id: &str,
        update: &ConversationUpdate,
    ) -> Result<Conversation, ApiError> {
        self.put_json(&format!("{}/{}", CONVERSATIONS_PATH, conversation_id), update)
            .await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("{}/{}", CONVERSATIONS_PATH, conversation_id))
            .await
    }

    pub async fn add_message(&self, conversation_id: &str, message: &NewMessage) -> Result<Message, ApiError> {
        self.post_json(
            &format!("{}/{}/messages", CONVERSATIONS_PATH, conversation_id),
            message,
        )
        .await
    }

    pub async fn create_folder(&self, folder: &NewFolder) -> Result<Folder, ApiError> {
        self.post_json(&format!("{}/folders", CONVERSATIONS_PATH), folder)
            .await
    }

    pub async fn create_tag(&self, tag: &NewTag) -> Result<Tag, ApiError> {
        self.post_json(&format!("{}/tags", CONVERSATIONS_PATH), tag).await
    }

    /// Raw export body as produced by the server; rendering it is up to the caller.
    pub async fn export_conversation(&self, conversation_id: &str) -> Result<String, ApiError> {
        self.get_text(&format!("{}/{}/export", CONVERSATIONS_PATH, conversation_id))
            .await
    }
}
