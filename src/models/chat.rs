use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use rusqlite::types::{ ToSql, ToSqlOutput };
use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFieldError {
    message: String,
}

impl fmt::Display for ParseFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseFieldError {}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ =>
                Err(ParseFieldError {
                    message: format!("Invalid role: '{}'", s),
                }),
        }
    }
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "file" => Ok(MessageKind::File),
            _ =>
                Err(ParseFieldError {
                    message: format!("Invalid message type: '{}'", s),
                }),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl ToSql for MessageKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A single message in a room's history, keyed by its client-generated `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub user: String,
    pub role: Role,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
}

impl ChatMessage {
    pub fn text(id: &str, content: &str, user: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
            user: user.to_string(),
            role,
            kind: MessageKind::Text,
            file_name: None,
            file_size: None,
            file_type: None,
            file_data: None,
        }
    }

    fn file_fields_present(&self) -> usize {
        [
            self.file_name.is_some(),
            self.file_size.is_some(),
            self.file_type.is_some(),
            self.file_data.is_some(),
        ]
            .iter()
            .filter(|present| **present)
            .count()
    }

    /// Lists shape problems with this message. An empty list means well formed.
    ///
    /// File messages should carry all four file fields, text messages none of
    /// them, and `fileData` must be base64 whose decoded length is `fileSize`.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let present = self.file_fields_present();

        match self.kind {
            MessageKind::Text if present > 0 => {
                problems.push("text message carries file fields".to_string());
            }
            MessageKind::File if present < 4 => {
                problems.push(format!("file message has {} of 4 file fields", present));
            }
            _ => {}
        }

        if let Some(size) = self.file_size {
            if i64::try_from(size).is_err() {
                problems.push(format!("fileSize {} is out of range", size));
            }
        }

        if let Some(data) = &self.file_data {
            match STANDARD.decode(data) {
                Ok(bytes) => {
                    if let Some(size) = self.file_size {
                        if bytes.len() as u64 != size {
                            problems.push(
                                format!(
                                    "fileSize is {} but fileData decodes to {} bytes",
                                    size,
                                    bytes.len()
                                )
                            );
                        }
                    }
                }
                Err(e) => problems.push(format!("fileData is not valid base64: {}", e)),
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_message(data: &str, size: u64) -> ChatMessage {
        ChatMessage {
            kind: MessageKind::File,
            file_name: Some("notes.txt".into()),
            file_size: Some(size),
            file_type: Some("text/plain".into()),
            file_data: Some(data.into()),
            ..ChatMessage::text("f1", "📎 notes.txt", "Bob", Role::User)
        }
    }

    #[test]
    fn text_message_serializes_without_file_fields() {
        let msg = ChatMessage::text("m1", "hi", "Alice", Role::User);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({ "id": "m1", "content": "hi", "user": "Alice", "role": "user", "type": "text" })
        );
    }

    #[test]
    fn missing_type_defaults_to_text() {
        let msg: ChatMessage = serde_json
            ::from_value(json!({ "id": "m1", "content": "hi", "user": "Alice", "role": "assistant" }))
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let res = serde_json::from_value::<ChatMessage>(
            json!({ "id": "m1", "content": "hi", "user": "Alice", "role": "admin" })
        );
        assert!(res.is_err());
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn well_formed_file_message_validates() {
        // "hello" in base64
        let msg = file_message("aGVsbG8=", 5);
        assert!(msg.validate().is_empty());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["fileName"], "notes.txt");
        assert_eq!(value["type"], "file");
    }

    #[test]
    fn validate_reports_shape_problems() {
        assert_eq!(file_message("aGVsbG8=", 9).validate().len(), 1);
        assert_eq!(file_message("not base64!!", 5).validate().len(), 1);

        let mut partial = file_message("aGVsbG8=", 5);
        partial.file_type = None;
        assert_eq!(partial.validate(), vec!["file message has 3 of 4 file fields".to_string()]);

        let huge = file_message("aGVsbG8=", u64::MAX);
        assert!(huge.validate().contains(&format!("fileSize {} is out of range", u64::MAX)));

        let mut text = ChatMessage::text("m1", "hi", "Alice", Role::User);
        text.file_name = Some("x".into());
        assert_eq!(text.validate(), vec!["text message carries file fields".to_string()]);
    }
}
