use serde::{Deserialize, Serialize};

use crate::geometry::{Position, TextChange};
use crate::ids::{ChatId, ConnectionId, FileId, ProjectId, UserId};
use crate::records::{ExecutionRecord, FileRecord, MessageRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMembership {
    pub project_id: ProjectId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileScope {
    pub project_id: ProjectId,
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub changes: Vec<TextChange>,
    /// Sender-local document version; informational only.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSave {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub content: String,
}

/// Events the client emits. Serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a chat room.
    Join(ChatId),
    /// Leave a chat room.
    Leave(ChatId),
    JoinProject(ProjectMembership),
    LeaveProject(ProjectMembership),
    FileOpen(FileScope),
    FileClose(FileScope),
    CodeChange(CodeChange),
    CursorUpdate(CursorUpdate),
    FileSave(FileSave),
    SendMessage(MessageRecord),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Leave(_) => "leave",
            ClientEvent::JoinProject(_) => "join_project",
            ClientEvent::LeaveProject(_) => "leave_project",
            ClientEvent::FileOpen(_) => "file_open",
            ClientEvent::FileClose(_) => "file_close",
            ClientEvent::CodeChange(_) => "code_change",
            ClientEvent::CursorUpdate(_) => "cursor_update",
            ClientEvent::FileSave(_) => "file_save",
            ClientEvent::SendMessage(_) => "send_message",
        }
    }

    pub const NAMES: &'static [&'static str] = &[
        "join",
        "leave",
        "join_project",
        "leave_project",
        "file_open",
        "file_close",
        "code_change",
        "cursor_update",
        "file_save",
        "send_message",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub socket_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsers {
    pub active_users: Vec<PresenceUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCreated {
    pub file: FileRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleted {
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRenamed {
    pub file_id: FileId,
    pub new_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdated {
    pub file_id: FileId,
    pub changes: Vec<TextChange>,
    pub user_id: UserId,
    pub socket_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMoved {
    pub file_id: FileId,
    pub user_id: UserId,
    pub socket_id: ConnectionId,
    pub username: String,
    pub position: Position,
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake completion carrying this connection's id.
    Connected(ConnectedPayload),
    Error(ErrorPayload),
    /// Project chat broadcast.
    NewMessage(MessageRecord),
    /// Global chat broadcast.
    Message(MessageRecord),
    UserJoined(PresenceUser),
    UserLeft(UserLeft),
    ProjectUsers(ProjectUsers),
    FileCreated(FileCreated),
    FileDeleted(FileDeleted),
    FileRenamed(FileRenamed),
    CodeUpdated(CodeUpdated),
    CursorMoved(CursorMoved),
    ExecutionComplete(ExecutionRecord),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::Error(_) => "error",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::Message(_) => "message",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::ProjectUsers(_) => "project_users",
            ServerEvent::FileCreated(_) => "file_created",
            ServerEvent::FileDeleted(_) => "file_deleted",
            ServerEvent::FileRenamed(_) => "file_renamed",
            ServerEvent::CodeUpdated(_) => "code_updated",
            ServerEvent::CursorMoved(_) => "cursor_moved",
            ServerEvent::ExecutionComplete(_) => "execution_complete",
        }
    }

    pub const NAMES: &'static [&'static str] = &[
        "connected",
        "error",
        "new_message",
        "message",
        "user_joined",
        "user_left",
        "project_users",
        "file_created",
        "file_deleted",
        "file_renamed",
        "code_updated",
        "cursor_moved",
        "execution_complete",
    ];
}
