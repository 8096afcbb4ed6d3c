//! Scripted in-memory `CollabApi` used by tests and offline demos.

use super::{
    ApiError, AudioMessage, AudioUpload, CloneProject, CollabApi, CompletionRequest, Credentials,
    ExecuteRequest, LoginRequest, NewFile, NewProject, PasswordChange, ProfileUpdate,
    RegisterRequest,
};
use async_trait::async_trait;
use collab_proto::{
    AuthRecord, ChatId, ChatRecord, ChatSummary, ExecutionOutputRecord, ExecutionRecord, FileId,
    FileKind, FileRecord, MessageId, MessageKind, MessageRecord, ProjectId, ProjectRecord,
    UserRecord, UserRef,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub enum MockFailure {
    Status(u16, &'static str),
    Unauthorized,
}

impl MockFailure {
    fn into_error(self) -> ApiError {
        match self {
            MockFailure::Status(status, message) => ApiError::HttpStatus {
                status,
                message: message.to_string(),
            },
            MockFailure::Unauthorized => ApiError::Unauthorized,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub user: Option<UserRecord>,
    pub projects: Vec<ProjectRecord>,
    /// Authoritative file records, content included.
    pub files: HashMap<FileId, FileRecord>,
    pub chats: Vec<ChatRecord>,
    pub execution: Option<ExecutionRecord>,
    pub suggestion: String,
    pub saved: Vec<(FileId, String)>,
    pub calls: Vec<String>,
    failures: HashMap<String, VecDeque<MockFailure>>,
    latency: HashMap<String, Duration>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn user(&self) -> UserRecord {
        self.user.clone().unwrap_or_else(default_user)
    }

    fn message(&mut self, chat: &ChatId, build: impl FnOnce(&mut MessageRecord)) -> MessageRecord {
        let mut message = MessageRecord {
            id: MessageId::new(self.next_id("m")),
            sender: Some(UserRef::User(self.user())),
            content: None,
            audio_url: None,
            audio_duration: None,
            message_type: Some(MessageKind::Text),
            created_at: Some(OffsetDateTime::now_utc()),
            chat: Some(chat.clone()),
        };
        build(&mut message);
        if let Some(room) = self.chats.iter_mut().find(|room| &room.id == chat) {
            room.messages.push(message.clone());
        }
        message
    }
}

fn default_user() -> UserRecord {
    UserRecord {
        id: "u-ada".into(),
        username: "ada".into(),
        email: Some("ada@example.com".into()),
    }
}

#[derive(Debug)]
pub struct MockApi {
    credentials: Credentials,
    state: Mutex<MockState>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            credentials: Credentials::default(),
            state: Mutex::new(MockState {
                user: Some(default_user()),
                ..MockState::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a project and its files. File content stays server side.
    pub fn seed_project(&self, project: ProjectRecord) {
        let mut state = self.state();
        for file in &project.files {
            state.files.insert(file.id.clone(), file.clone());
        }
        state.projects.push(project);
    }

    pub fn seed_chat(&self, chat: ChatRecord) {
        self.state().chats.push(chat);
    }

    pub fn set_execution(&self, record: ExecutionRecord) {
        self.state().execution = Some(record);
    }

    pub fn set_suggestion(&self, suggestion: impl Into<String>) {
        self.state().suggestion = suggestion.into();
    }

    /// The next call to `operation` fails with `failure`.
    pub fn fail_next(&self, operation: &str, failure: MockFailure) {
        self.state()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Every later call to `operation` waits `delay` before answering.
    pub fn set_latency(&self, operation: &str, delay: Duration) {
        self.state().latency.insert(operation.to_string(), delay);
    }

    async fn wait(&self, operation: &str) {
        let delay = self.state().latency.get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn saved(&self) -> Vec<(FileId, String)> {
        self.state().saved.clone()
    }

    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, MockState>, ApiError> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        let failure = state
            .failures
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some(MockFailure::Unauthorized) => {
                drop(state);
                self.credentials.mark_expired();
                Err(ApiError::Unauthorized)
            }
            Some(failure) => Err(failure.into_error()),
            None => Ok(state),
        }
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::HttpStatus {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl CollabApi for MockApi {
    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn login(&self, _request: &LoginRequest) -> Result<AuthRecord, ApiError> {
        let state = self.enter("login")?;
        let user = state.user();
        Ok(AuthRecord {
            token: format!("token-{}", user.username),
            user,
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthRecord, ApiError> {
        let mut state = self.enter("register")?;
        let user = UserRecord {
            id: state.next_id("u").into(),
            username: request.username.clone(),
            email: Some(request.email.clone()),
        };
        state.user = Some(user.clone());
        Ok(AuthRecord {
            token: format!("token-{}", user.username),
            user,
        })
    }

    async fn profile(&self) -> Result<UserRecord, ApiError> {
        Ok(self.enter("profile")?.user())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserRecord, ApiError> {
        let mut state = self.enter("update_profile")?;
        let mut user = state.user();
        user.username = update.username.clone();
        user.email = Some(update.email.clone());
        state.user = Some(user.clone());
        Ok(user)
    }

    async fn change_password(&self, _change: &PasswordChange) -> Result<(), ApiError> {
        self.enter("change_password")?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ApiError> {
        Ok(self.enter("list_projects")?.projects.clone())
    }

    async fn create_project(&self, project: &NewProject) -> Result<ProjectRecord, ApiError> {
        let mut state = self.enter("create_project")?;
        let record = ProjectRecord {
            id: state.next_id("p").into(),
            name: project.name.clone(),
            description: project.description.clone(),
            language: Some(project.language.clone()),
            owner: UserRef::Id(state.user().id),
            files: Vec::new(),
            chat: None,
            visibility: Some(project.visibility.clone()),
        };
        state.projects.push(record.clone());
        Ok(record)
    }

    async fn get_project(&self, project: &ProjectId) -> Result<ProjectRecord, ApiError> {
        let state = self.enter("get_project")?;
        let mut record = state
            .projects
            .iter()
            .find(|candidate| &candidate.id == project)
            .cloned()
            .ok_or_else(|| not_found("project"))?;
        for file in &mut record.files {
            file.content = None;
        }
        Ok(record)
    }

    async fn delete_project(&self, project: &ProjectId) -> Result<(), ApiError> {
        let mut state = self.enter("delete_project")?;
        state.projects.retain(|candidate| &candidate.id != project);
        Ok(())
    }

    async fn clone_project(
        &self,
        project: &ProjectId,
        request: &CloneProject,
    ) -> Result<ProjectRecord, ApiError> {
        let mut state = self.enter("clone_project")?;
        let source = state
            .projects
            .iter()
            .find(|candidate| &candidate.id == project)
            .cloned()
            .ok_or_else(|| not_found("project"))?;
        let record = ProjectRecord {
            id: state.next_id("p").into(),
            name: request.name.clone(),
            visibility: Some(request.visibility.clone()),
            owner: UserRef::Id(state.user().id),
            ..source
        };
        state.projects.insert(0, record.clone());
        Ok(record)
    }

    async fn get_file(&self, _project: &ProjectId, file: &FileId) -> Result<FileRecord, ApiError> {
        self.wait("get_file").await;
        let state = self.enter("get_file")?;
        state.files.get(file).cloned().ok_or_else(|| not_found("file"))
    }

    async fn create_file(
        &self,
        project: &ProjectId,
        file: &NewFile,
    ) -> Result<FileRecord, ApiError> {
        let mut state = self.enter("create_file")?;
        let record = FileRecord {
            id: state.next_id("f").into(),
            name: file.name.clone(),
            kind: file.kind,
            parent: file.parent.clone(),
            content: match file.kind {
                FileKind::File => Some(String::new()),
                FileKind::Folder => None,
            },
            language: None,
        };
        state.files.insert(record.id.clone(), record.clone());
        if let Some(owner) = state.projects.iter_mut().find(|p| &p.id == project) {
            owner.files.push(record.clone());
        }
        Ok(record)
    }

    async fn save_file(
        &self,
        _project: &ProjectId,
        file: &FileId,
        content: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.enter("save_file")?;
        state.saved.push((file.clone(), content.to_string()));
        if let Some(record) = state.files.get_mut(file) {
            record.content = Some(content.to_string());
        }
        Ok(())
    }

    async fn delete_file(&self, project: &ProjectId, file: &FileId) -> Result<(), ApiError> {
        let mut state = self.enter("delete_file")?;
        state.files.remove(file);
        if let Some(owner) = state.projects.iter_mut().find(|p| &p.id == project) {
            owner.files.retain(|candidate| &candidate.id != file);
        }
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        let state = self.enter("list_chats")?;
        Ok(state
            .chats
            .iter()
            .map(|chat| ChatSummary {
                id: chat.id.clone(),
                name: chat.name.clone(),
            })
            .collect())
    }

    async fn get_chat(&self, chat: &ChatId) -> Result<ChatRecord, ApiError> {
        let state = self.enter("get_chat")?;
        state
            .chats
            .iter()
            .find(|candidate| &candidate.id == chat)
            .cloned()
            .ok_or_else(|| not_found("chat"))
    }

    async fn post_message(&self, chat: &ChatId, content: &str) -> Result<MessageRecord, ApiError> {
        let mut state = self.enter("post_message")?;
        Ok(state.message(chat, |message| {
            message.content = Some(content.to_string());
        }))
    }

    async fn upload_audio(
        &self,
        _bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<AudioUpload, ApiError> {
        let mut state = self.enter("upload_audio")?;
        let id = state.next_id("a");
        Ok(AudioUpload {
            audio_url: format!("/uploads/audio/{id}-{file_name}"),
        })
    }

    async fn post_audio_message(
        &self,
        chat: &ChatId,
        audio: &AudioMessage,
    ) -> Result<MessageRecord, ApiError> {
        let mut state = self.enter("post_audio_message")?;
        Ok(state.message(chat, |message| {
            message.audio_url = Some(audio.audio_url.clone());
            message.audio_duration = Some(f64::from(audio.audio_duration));
            message.message_type = Some(MessageKind::Audio);
        }))
    }

    async fn execute(&self, _request: &ExecuteRequest) -> Result<ExecutionRecord, ApiError> {
        let state = self.enter("execute")?;
        Ok(state.execution.clone().unwrap_or_else(|| ExecutionRecord {
            status: "completed".into(),
            output: ExecutionOutputRecord::default(),
            execution_time: None,
            memory_used: None,
            local: false,
            mock: true,
        }))
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ApiError> {
        Ok(self.enter("complete")?.suggestion.clone())
    }
}
