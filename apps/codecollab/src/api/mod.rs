//! REST surface of the collaboration server.
//!
//! `CollabApi` is the seam every state component talks to; `HttpApi` is the
//! reqwest implementation and tests substitute scripted fakes.

mod http;
pub mod mock;
mod models;

pub use http::HttpApi;
pub use models::{
    AudioMessage, AudioUpload, CloneProject, CompletionRequest, CursorPosition, ExecuteRequest,
    LoginRequest, NewFile, NewProject, PasswordChange, ProfileUpdate, RegisterRequest,
};

use async_trait::async_trait;
use collab_proto::{
    AuthRecord, ChatId, ChatRecord, ChatSummary, ExecutionRecord, FileId, FileRecord,
    MessageRecord, ProjectId, ProjectRecord, UserRecord,
};
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("not authorized")]
    Unauthorized,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Human readable reason, preferring the server's own message.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::HttpStatus { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Bearer token shared by every request plus a counter bumped whenever the
/// server rejects it.
#[derive(Debug)]
pub struct Credentials {
    token: RwLock<Option<String>>,
    expired: watch::Sender<u64>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            token: RwLock::new(None),
            expired: watch::channel(0).0,
        }
    }
}

impl Credentials {
    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    /// Drops the token and notifies subscribers. Only fires when a token
    /// was actually held, so a failed login is not mistaken for expiry.
    pub fn mark_expired(&self) {
        let had_token = match self.token.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        };
        if had_token {
            self.expired.send_modify(|count| *count += 1);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.expired.subscribe()
    }
}

#[async_trait]
pub trait CollabApi: Send + Sync {
    fn credentials(&self) -> &Credentials;

    async fn login(&self, request: &LoginRequest) -> Result<AuthRecord, ApiError>;
    async fn register(&self, request: &RegisterRequest) -> Result<AuthRecord, ApiError>;
    async fn profile(&self) -> Result<UserRecord, ApiError>;
    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserRecord, ApiError>;
    async fn change_password(&self, change: &PasswordChange) -> Result<(), ApiError>;

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ApiError>;
    async fn create_project(&self, project: &NewProject) -> Result<ProjectRecord, ApiError>;
    async fn get_project(&self, project: &ProjectId) -> Result<ProjectRecord, ApiError>;
    async fn delete_project(&self, project: &ProjectId) -> Result<(), ApiError>;
    async fn clone_project(
        &self,
        project: &ProjectId,
        request: &CloneProject,
    ) -> Result<ProjectRecord, ApiError>;

    async fn get_file(&self, project: &ProjectId, file: &FileId) -> Result<FileRecord, ApiError>;
    async fn create_file(&self, project: &ProjectId, file: &NewFile)
    -> Result<FileRecord, ApiError>;
    async fn save_file(
        &self,
        project: &ProjectId,
        file: &FileId,
        content: &str,
    ) -> Result<(), ApiError>;
    async fn delete_file(&self, project: &ProjectId, file: &FileId) -> Result<(), ApiError>;

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError>;
    async fn get_chat(&self, chat: &ChatId) -> Result<ChatRecord, ApiError>;
    async fn post_message(&self, chat: &ChatId, content: &str) -> Result<MessageRecord, ApiError>;
    async fn upload_audio(&self, bytes: Vec<u8>, file_name: &str)
    -> Result<AudioUpload, ApiError>;
    async fn post_audio_message(
        &self,
        chat: &ChatId,
        message: &AudioMessage,
    ) -> Result<MessageRecord, ApiError>;

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionRecord, ApiError>;
    /// Returns the raw suggestion, possibly empty.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ApiError>;
}
