use crate::models::chat::{ ChatMessage, MessageKind, Role };
use serde::{ Serialize, Deserialize };

/// Fields carried by `add` and `update` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub content: String,
    pub user: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
}

impl MessagePayload {
    pub fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            content: self.content,
            user: self.user,
            role: self.role,
            kind: self.message_type.unwrap_or_default(),
            file_name: self.file_name,
            file_size: self.file_size,
            file_type: self.file_type,
            file_data: self.file_data,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "add")] Add(MessagePayload),
    #[serde(rename = "update")] Update(MessagePayload),
    #[serde(rename = "all")] All {
        messages: Vec<ChatMessage>,
    },
    #[serde(other)]
    Unknown,
}
