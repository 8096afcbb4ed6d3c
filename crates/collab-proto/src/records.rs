use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{ChatId, FileId, MessageId, ProjectId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A user reference that the server sends either populated or as a bare id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(UserId),
    User(UserRecord),
}

impl UserRef {
    pub fn id(&self) -> &UserId {
        match self {
            UserRef::Id(id) => id,
            UserRef::User(user) => &user.id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::User(user) => Some(user.username.as_str()),
        }
    }
}

/// Login/register response: the token next to the user fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub token: String,
    #[serde(flatten)]
    pub user: UserRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub id: FileId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default)]
    pub parent: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    #[serde(rename = "_id")]
    pub id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRef {
    Id(ChatId),
    Chat(ChatSummary),
}

impl ChatRef {
    pub fn id(&self) -> &ChatId {
        match self {
            ChatRef::Id(id) => id,
            ChatRef::Chat(chat) => &chat.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "_id")]
    pub id: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub owner: UserRef,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
}

/// Chat message as stored and broadcast by the server. Every field is
/// optional on the wire; validation happens when the client admits it into a
/// stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageKind>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(rename = "_id")]
    pub id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<UserRef>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutputRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sandbox response, returned by `POST /execute` and relayed as
/// `execution_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub status: String,
    #[serde(default)]
    pub output: ExecutionOutputRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<u64>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub mock: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn project_owner_and_chat_accept_ids_or_objects() {
        let bare: ProjectRecord = serde_json::from_value(json!({
            "_id": "p1",
            "name": "demo",
            "owner": "u1",
            "chat": "c1"
        }))
        .unwrap();
        assert_eq!(bare.owner.id().as_str(), "u1");
        assert_eq!(bare.chat.as_ref().map(|c| c.id().as_str()), Some("c1"));
        assert!(bare.files.is_empty());

        let populated: ProjectRecord = serde_json::from_value(json!({
            "_id": "p1",
            "name": "demo",
            "owner": { "_id": "u1", "username": "ada" },
            "chat": { "_id": "c1", "name": "demo chat" },
            "files": [
                { "_id": "f1", "name": "src", "type": "folder", "parent": null },
                { "_id": "f2", "name": "a.js", "type": "file", "parent": "f1", "language": "javascript" }
            ]
        }))
        .unwrap();
        assert_eq!(populated.owner.username(), Some("ada"));
        assert_eq!(populated.chat.unwrap().id().as_str(), "c1");
        assert_eq!(populated.files[1].parent.as_ref().unwrap().as_str(), "f1");
        assert_eq!(populated.files[0].kind, FileKind::Folder);
    }

    #[test_timeout::timeout]
    fn message_record_tolerates_partial_payloads() {
        let message: MessageRecord = serde_json::from_value(json!({
            "_id": "m1",
            "sender": "u1",
            "audioUrl": "/uploads/a.webm",
            "audioDuration": 3.5,
            "messageType": "audio",
            "createdAt": "2024-05-01T10:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(message.sender.as_ref().unwrap().username(), None);
        assert_eq!(message.message_type, Some(MessageKind::Audio));
        assert!(message.created_at.is_some());
        assert!(message.content.is_none());
    }

    #[test_timeout::timeout]
    fn execution_record_keeps_output_channels_apart() {
        let record: ExecutionRecord = serde_json::from_value(json!({
            "status": "error",
            "output": { "stdout": "", "stderr": "boom", "compileOutput": "warning" },
            "executionTime": 12,
            "memoryUsed": 2048,
            "mock": true
        }))
        .unwrap();
        assert_eq!(record.output.stderr.as_deref(), Some("boom"));
        assert_eq!(record.output.compile_output.as_deref(), Some("warning"));
        assert_eq!(record.output.error, None);
        assert!(record.mock);
        assert!(!record.local);
    }

    #[test_timeout::timeout]
    fn auth_record_flattens_user_fields() {
        let record: AuthRecord = serde_json::from_value(json!({
            "token": "t0k",
            "_id": "u1",
            "username": "ada",
            "email": "ada@example.com"
        }))
        .unwrap();
        assert_eq!(record.token, "t0k");
        assert_eq!(record.user.username, "ada");
    }
}
