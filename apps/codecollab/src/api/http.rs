use super::models::{CompletionResponse, ErrorBody};
use super::{
    ApiError, AudioMessage, AudioUpload, CloneProject, CollabApi, CompletionRequest, Credentials,
    ExecuteRequest, LoginRequest, NewFile, NewProject, PasswordChange, ProfileUpdate,
    RegisterRequest,
};
use async_trait::async_trait;
use collab_proto::{
    AuthRecord, ChatId, ChatRecord, ChatSummary, ExecutionRecord, FileId, FileRecord,
    MessageRecord, ProjectId, ProjectRecord, UserRecord,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// reqwest-backed client rooted at `<origin>/api/`.
#[derive(Debug)]
pub struct HttpApi {
    client: Client,
    base: Url,
    credentials: Credentials,
}

impl HttpApi {
    pub fn new(base: Url) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base,
            credentials: Credentials::default(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::InvalidConfig(format!("invalid endpoint '{path}': {err}")))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(&self, path: &str, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(target: "codecollab::api", path, "request rejected as unauthorized");
            self.credentials.mark_expired();
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
            let message = body.message.or(body.error).unwrap_or(text);
            debug!(target: "codecollab::api", path, status = status.as_u16(), %message, "request failed");
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorize(builder).send().await?;
        self.check(path, response).await
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.send(path, self.client.get(url)).await?;
        Self::read(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.send(path, self.client.post(url).json(body)).await?;
        Self::read(response).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        let url = self.endpoint(path)?;
        self.send(path, self.client.put(url).json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = self.endpoint(path)?;
        self.send(path, self.client.delete(url)).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[async_trait]
impl CollabApi for HttpApi {
    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthRecord, ApiError> {
        self.post("users/login", request).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthRecord, ApiError> {
        self.post("users", request).await
    }

    async fn profile(&self) -> Result<UserRecord, ApiError> {
        self.get("users/profile").await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserRecord, ApiError> {
        let response = self.put("users/profile", update).await?;
        Self::read(response).await
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<(), ApiError> {
        self.put("users/password", change).await?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ApiError> {
        self.get("projects").await
    }

    async fn create_project(&self, project: &NewProject) -> Result<ProjectRecord, ApiError> {
        self.post("projects", project).await
    }

    async fn get_project(&self, project: &ProjectId) -> Result<ProjectRecord, ApiError> {
        self.get(&format!("projects/{project}")).await
    }

    async fn delete_project(&self, project: &ProjectId) -> Result<(), ApiError> {
        self.delete(&format!("projects/{project}")).await
    }

    async fn clone_project(
        &self,
        project: &ProjectId,
        request: &CloneProject,
    ) -> Result<ProjectRecord, ApiError> {
        self.post(&format!("projects/{project}/clone"), request).await
    }

    async fn get_file(&self, project: &ProjectId, file: &FileId) -> Result<FileRecord, ApiError> {
        self.get(&format!("projects/{project}/files/{file}")).await
    }

    async fn create_file(
        &self,
        project: &ProjectId,
        file: &NewFile,
    ) -> Result<FileRecord, ApiError> {
        self.post(&format!("projects/{project}/files"), file).await
    }

    async fn save_file(
        &self,
        project: &ProjectId,
        file: &FileId,
        content: &str,
    ) -> Result<(), ApiError> {
        self.put(
            &format!("projects/{project}/files/{file}"),
            &ContentBody { content },
        )
        .await?;
        Ok(())
    }

    async fn delete_file(&self, project: &ProjectId, file: &FileId) -> Result<(), ApiError> {
        self.delete(&format!("projects/{project}/files/{file}")).await
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.get("chats").await
    }

    async fn get_chat(&self, chat: &ChatId) -> Result<ChatRecord, ApiError> {
        self.get(&format!("chats/{chat}")).await
    }

    async fn post_message(&self, chat: &ChatId, content: &str) -> Result<MessageRecord, ApiError> {
        self.post(&format!("chats/{chat}/messages"), &ContentBody { content })
            .await
    }

    async fn upload_audio(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<AudioUpload, ApiError> {
        let path = "audio/upload";
        let url = self.endpoint(path)?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("audio/wav")?;
        let form = Form::new().part("audio", part);
        let response = self.send(path, self.client.post(url).multipart(form)).await?;
        Self::read(response).await
    }

    async fn post_audio_message(
        &self,
        chat: &ChatId,
        message: &AudioMessage,
    ) -> Result<MessageRecord, ApiError> {
        self.post(&format!("audio/chats/{chat}/audio"), message).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionRecord, ApiError> {
        self.post("execute", request).await
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ApiError> {
        let response: CompletionResponse = self.post("ai/complete", request).await?;
        Ok(response.suggestion.unwrap_or_default())
    }
}
