//! Application state with an explicit lifecycle.
//!
//! Signing in starts the transport session; signing out, or any request
//! the server answers with 401, tears down the session and every joined
//! room. Entering a project always leaves the previous one first.

use crate::api::{ApiError, CloneProject, CollabApi, NewProject};
use crate::auth::{Auth, AuthError, Registration, TokenStore};
use crate::chat::{global_chat, ChatError, ChatStream, MergeOutcome, RoomKind};
use crate::config::Config;
use crate::project::{LinkInfo, ProjectRoom, RoomUpdate};
use crate::session::{ConnectionState, Outbox, Session, SessionConfig, SessionEvent};
use crate::transport::Connector;
use collab_proto::{ProjectId, ProjectRecord, ServerEvent, UserRecord};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("no project is open")]
    NoProject,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl AppError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AppError::Auth(err) => err.is_unauthorized(),
            AppError::Api(err) => err.is_unauthorized(),
            AppError::Chat(err) => err.is_unauthorized(),
            AppError::NotSignedIn | AppError::NoProject => false,
        }
    }
}

/// Something [`App::recv`] picked up that still has to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Session(SessionEvent),
    /// Some request was answered with 401.
    Expired,
    /// The session ended for good.
    Closed,
}

/// What [`App::dispatch`] did with an [`Inbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Connection(ConnectionState),
    Room(RoomUpdate),
    GlobalChat(MergeOutcome),
    /// Credentials were rejected; everything was torn down.
    SignedOut,
    /// The session ended for good.
    Closed,
}

pub struct App {
    config: Config,
    api: Arc<dyn CollabApi>,
    connector: Arc<dyn Connector>,
    auth: Auth,
    expiry: watch::Receiver<u64>,
    session: Option<Session>,
    link: Option<LinkInfo>,
    room: Option<ProjectRoom>,
    global_chat: Option<ChatStream>,
}

impl App {
    pub fn new(
        config: Config,
        api: Arc<dyn CollabApi>,
        store: Arc<dyn TokenStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let expiry = api.credentials().subscribe();
        let auth = Auth::new(api.clone(), store);
        Self {
            config,
            api,
            connector,
            auth,
            expiry,
            session: None,
            link: None,
            room: None,
            global_chat: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn CollabApi> {
        &self.api
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut Auth {
        &mut self.auth
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.auth.user()
    }

    pub fn connection(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn room(&self) -> Option<&ProjectRoom> {
        self.room.as_ref()
    }

    pub fn room_mut(&mut self) -> Option<&mut ProjectRoom> {
        self.room.as_mut()
    }

    pub fn global_chat(&self) -> Option<&ChatStream> {
        self.global_chat.as_ref()
    }

    pub fn global_chat_mut(&mut self) -> Option<&mut ChatStream> {
        self.global_chat.as_mut()
    }

    /// Resumes a stored login and connects. Returns whether a user is
    /// signed in afterwards.
    pub async fn restore(&mut self) -> Result<bool, AppError> {
        if self.auth.restore().await?.is_none() {
            return Ok(false);
        }
        self.start_session()?;
        Ok(true)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<(), AppError> {
        self.teardown().await;
        self.auth.login(email, password).await?;
        self.start_session()
    }

    pub async fn register(&mut self, form: &Registration) -> Result<(), AppError> {
        self.teardown().await;
        self.auth.register(form).await?;
        self.start_session()
    }

    pub async fn logout(&mut self) -> Result<(), AppError> {
        self.teardown().await;
        self.auth.logout()?;
        Ok(())
    }

    fn start_session(&mut self) -> Result<(), AppError> {
        let token = self.auth.token().ok_or(AppError::NotSignedIn)?;
        let session = Session::start(
            self.connector.clone(),
            SessionConfig {
                url: self.config.socket_url.clone(),
                token,
                connect_timeout: self.config.connect_timeout,
                reconnect: self.config.reconnect,
            },
        );
        self.expiry = self.api.credentials().subscribe();
        self.session = Some(session);
        self.link = None;
        info!(target: "codecollab::session", url = %self.config.socket_url, "session started");
        Ok(())
    }

    /// Leaves every room, then closes the session.
    async fn teardown(&mut self) {
        if let Some(room) = self.room.take() {
            room.leave();
        }
        if let Some(mut chat) = self.global_chat.take() {
            chat.leave();
        }
        self.link = None;
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// The server rejected the token: drop it and everything built on it.
    async fn sign_out_expired(&mut self) {
        self.teardown().await;
        if let Err(err) = self.auth.expire() {
            warn!(target: "codecollab::auth", error = %err, "failed to clear stored token");
        }
    }

    fn outbox(&self) -> Result<Outbox, AppError> {
        self.session
            .as_ref()
            .map(Session::outbox)
            .ok_or(AppError::NotSignedIn)
    }

    fn user_id(&self) -> Result<collab_proto::UserId, AppError> {
        self.auth
            .user()
            .map(|user| user.id.clone())
            .ok_or(AppError::NotSignedIn)
    }

    /// Enters a project room, leaving the current one first.
    pub async fn enter_project(&mut self, id: &ProjectId) -> Result<&mut ProjectRoom, AppError> {
        if let Some(room) = self.room.take() {
            room.leave();
        }
        let room = ProjectRoom::enter(
            self.api.clone(),
            self.outbox()?,
            self.user_id()?,
            id,
            self.link.clone(),
            self.config.cursor_debounce,
        )
        .await?;
        Ok(self.room.insert(room))
    }

    pub fn leave_project(&mut self) {
        if let Some(room) = self.room.take() {
            room.leave();
        }
    }

    /// Joins the global chat room. Returns `None` when the server has none.
    pub async fn enter_global_chat(&mut self) -> Result<Option<&mut ChatStream>, AppError> {
        if let Some(mut chat) = self.global_chat.take() {
            chat.leave();
        }
        let Some(summary) = global_chat(self.api.as_ref()).await? else {
            return Ok(None);
        };
        let mut stream = ChatStream::new(
            self.api.clone(),
            self.outbox()?,
            summary.id,
            RoomKind::Global,
        );
        stream.enter().await?;
        Ok(Some(self.global_chat.insert(stream)))
    }

    pub fn leave_global_chat(&mut self) {
        if let Some(mut chat) = self.global_chat.take() {
            chat.leave();
        }
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, AppError> {
        Ok(self.api.list_projects().await?)
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<ProjectRecord, AppError> {
        let created = self.api.create_project(project).await?;
        info!(target: "codecollab::api", project = %created.id, name = %created.name, "project created");
        Ok(created)
    }

    /// Deletes a project, leaving its room first if it is open.
    pub async fn delete_project(&mut self, id: &ProjectId) -> Result<(), AppError> {
        self.api.delete_project(id).await?;
        if self.room.as_ref().is_some_and(|room| room.project_id() == id) {
            self.leave_project();
        }
        info!(target: "codecollab::api", project = %id, "project deleted");
        Ok(())
    }

    pub async fn clone_project(
        &self,
        id: &ProjectId,
        request: &CloneProject,
    ) -> Result<ProjectRecord, AppError> {
        Ok(self.api.clone_project(id, request).await?)
    }

    /// Releases debounced cursor updates.
    pub fn tick(&mut self, now: Instant) {
        if let Some(room) = self.room.as_mut() {
            room.tick(now);
        }
    }

    /// True once, after some request was rejected with 401.
    pub fn credentials_expired(&mut self) -> bool {
        let changed = self.expiry.has_changed().unwrap_or(false);
        if changed {
            self.expiry.borrow_and_update();
        }
        changed
    }

    /// Waits for the next session event or a credential rejection without
    /// acting on it. Cancel safe, so it can sit in a `select!` next to
    /// timers; hand the result to [`App::dispatch`] outside the select.
    /// Returns `None` when no session is running.
    pub async fn recv(&mut self) -> Option<Inbound> {
        let session = self.session.as_mut()?;
        let inbound = tokio::select! {
            changed = self.expiry.changed() => match changed {
                Ok(()) => Inbound::Expired,
                Err(_) => Inbound::Closed,
            },
            event = session.next_event() => match event {
                Some(event) => Inbound::Session(event),
                None => Inbound::Closed,
            },
        };
        Some(inbound)
    }

    /// Routes what [`App::recv`] returned to the joined rooms. May call
    /// the REST layer, so it must run to completion.
    pub async fn dispatch(&mut self, inbound: Inbound) -> AppEvent {
        match inbound {
            Inbound::Expired => {
                self.sign_out_expired().await;
                AppEvent::SignedOut
            }
            Inbound::Closed => AppEvent::Closed,
            Inbound::Session(event) => self.dispatch_session(event).await,
        }
    }

    /// [`App::recv`] followed by [`App::dispatch`]. Not cancel safe.
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        let inbound = self.recv().await?;
        Some(self.dispatch(inbound).await)
    }

    async fn dispatch_session(&mut self, event: SessionEvent) -> AppEvent {
        match &event {
            SessionEvent::Unauthorized => {
                self.sign_out_expired().await;
                return AppEvent::SignedOut;
            }
            SessionEvent::Connected {
                epoch,
                connection_id,
            } => {
                self.link = Some(LinkInfo {
                    epoch: *epoch,
                    connection_id: connection_id.clone(),
                });
                if let Some(chat) = self.global_chat.as_ref() {
                    chat.rejoin();
                }
            }
            SessionEvent::Disconnected { epoch, reason } => {
                debug!(target: "codecollab::session", epoch, reason = %reason, "link lost");
                if self.link.as_ref().is_some_and(|link| link.epoch == *epoch) {
                    self.link = None;
                }
            }
            SessionEvent::Message {
                epoch,
                event: message @ ServerEvent::Message(_),
            } => {
                let current = self.link.as_ref().is_some_and(|link| link.epoch == *epoch);
                let outcome = self
                    .global_chat
                    .as_mut()
                    .filter(|_| current)
                    .and_then(|chat| chat.handle(message));
                return match outcome {
                    Some(outcome) => AppEvent::GlobalChat(outcome),
                    None => AppEvent::Room(RoomUpdate::Ignored),
                };
            }
            SessionEvent::Message { .. } => {}
        }

        let connection = matches!(
            event,
            SessionEvent::Connected { .. } | SessionEvent::Disconnected { .. }
        );
        let update = match self.room.as_mut() {
            Some(room) => room.handle_session_event(event).await,
            None => RoomUpdate::Ignored,
        };
        if connection {
            AppEvent::Connection(self.connection())
        } else {
            AppEvent::Room(update)
        }
    }

    /// Leaves all rooms and closes the session without touching the
    /// stored token.
    pub async fn shutdown(mut self) {
        self.teardown().await;
    }
}
