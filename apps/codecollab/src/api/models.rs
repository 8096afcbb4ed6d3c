use collab_proto::{FileId, FileKind, ProjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileUpdate {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub language: String,
    pub visibility: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloneProject {
    pub name: String,
    pub visibility: String,
}

impl CloneProject {
    /// Private copy named after the source project.
    pub fn named_after(source: &str) -> Self {
        Self {
            name: format!("{source} (Clone)"),
            visibility: "private".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub parent: Option<FileId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUpload {
    pub audio_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMessage {
    pub audio_url: String,
    /// Whole seconds.
    pub audio_duration: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub code: String,
    pub language: String,
    pub cursor_position: CursorPosition,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
