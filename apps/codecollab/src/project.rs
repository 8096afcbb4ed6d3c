//! A joined project room: workspace, document sync, presence, cursors,
//! execution and the embedded chat, driven by session events.

use crate::api::{ApiError, CollabApi, CompletionRequest, CursorPosition, ExecuteRequest};
use crate::chat::{ChatError, ChatStream, MergeOutcome, RoomKind};
use crate::cursors::{CursorBroadcaster, CursorLayer, CursorOutcome};
use crate::document::{position_after, RemoteApply};
use crate::execution::{ExecutionCycle, ExecutionError, ExecutionResult, RunTicket};
use crate::origin::OriginFilter;
use crate::presence::PresenceTracker;
use crate::session::{Outbox, SessionEvent};
use crate::workspace::{OpenOutcome, SaveOutcome, Workspace, WorkspaceError};
use collab_proto::{
    ClientEvent, CodeChange, CodeUpdated, ConnectionId, CursorUpdate, ExecutionRecord, FileId,
    FileKind, FileSave, FileScope, MessageId, Position, ProjectId, ProjectMembership,
    ProjectRecord, ServerEvent, TextChange, UserId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_LANGUAGE: &str = "javascript";

/// The live connection a room starts on, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub epoch: u64,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEditOutcome {
    Applied(RemoteApply),
    SelfEcho,
    /// The file has a background tab; it will be refetched on activation.
    MarkedStale,
    NotOpen,
}

/// What an inbound event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    Ignored,
    Connection,
    Presence,
    Tree,
    Document(RemoteEditOutcome),
    Cursor(CursorOutcome),
    Chat(MergeOutcome),
    Execution,
}

pub struct ProjectRoom {
    api: Arc<dyn CollabApi>,
    outbox: Outbox,
    user_id: UserId,
    project: ProjectRecord,
    workspace: Workspace,
    presence: PresenceTracker,
    cursors: CursorLayer,
    broadcaster: CursorBroadcaster,
    execution: ExecutionCycle,
    chat: Option<ChatStream>,
    origin: OriginFilter,
    epoch: Option<u64>,
}

impl ProjectRoom {
    /// Loads the project, joins its room and its chat.
    pub async fn enter(
        api: Arc<dyn CollabApi>,
        outbox: Outbox,
        user_id: UserId,
        project_id: &ProjectId,
        link: Option<LinkInfo>,
        cursor_debounce: Duration,
    ) -> Result<Self, ApiError> {
        let mut project = api.get_project(project_id).await?;
        let files = std::mem::take(&mut project.files);
        let workspace = Workspace::new(api.clone(), project.id.clone(), files);

        let mut origin = OriginFilter::default();
        let epoch = link.map(|link| {
            origin.attach(link.connection_id);
            link.epoch
        });

        outbox.emit(ClientEvent::JoinProject(ProjectMembership {
            project_id: project.id.clone(),
            user_id: user_id.clone(),
        }));

        let mut chat = project.chat.as_ref().map(|chat| {
            ChatStream::new(api.clone(), outbox.clone(), chat.id().clone(), RoomKind::Project)
        });
        if let Some(stream) = chat.as_mut() {
            if let Err(err) = stream.enter().await {
                warn!(target: "codecollab::chat", project = %project.id, error = %err, "project chat history unavailable");
            }
        }

        info!(target: "codecollab::sync", project = %project.id, name = %project.name, files = workspace.tree().len(), "entered project");
        Ok(Self {
            api,
            outbox,
            user_id,
            project,
            workspace,
            presence: PresenceTracker::default(),
            cursors: CursorLayer::default(),
            broadcaster: CursorBroadcaster::new(cursor_debounce),
            execution: ExecutionCycle::default(),
            chat,
            origin,
            epoch,
        })
    }

    /// Leaves the project room and its chat. All room state goes with `self`.
    pub fn leave(mut self) {
        self.outbox.emit(ClientEvent::LeaveProject(self.membership()));
        if let Some(chat) = self.chat.as_mut() {
            chat.leave();
        }
        info!(target: "codecollab::sync", project = %self.project.id, "left project");
    }

    pub fn project(&self) -> &ProjectRecord {
        &self.project
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project.id
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn cursors(&self) -> &CursorLayer {
        &self.cursors
    }

    pub fn execution(&self) -> &ExecutionCycle {
        &self.execution
    }

    pub fn chat(&self) -> Option<&ChatStream> {
        self.chat.as_ref()
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.origin.local()
    }

    fn membership(&self) -> ProjectMembership {
        ProjectMembership {
            project_id: self.project.id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    fn scope(&self, file_id: &FileId) -> FileScope {
        FileScope {
            project_id: self.project.id.clone(),
            file_id: file_id.clone(),
        }
    }

    fn active_changed(&mut self) {
        self.cursors.retain_file(self.workspace.active_id());
        self.broadcaster.reset();
    }

    pub async fn open_file(&mut self, id: &FileId) -> Result<OpenOutcome, WorkspaceError> {
        let previous = self.workspace.active_id().cloned();
        let outcome = self.workspace.open_file(id).await?;
        if outcome == OpenOutcome::Opened {
            self.outbox.emit(ClientEvent::FileOpen(self.scope(id)));
        }
        if previous.as_ref() != Some(id) {
            self.active_changed();
        }
        Ok(outcome)
    }

    pub async fn close_file(&mut self, id: &FileId) -> bool {
        let previous = self.workspace.active_id().cloned();
        if !self.workspace.close_file(id) {
            return false;
        }
        self.outbox.emit(ClientEvent::FileClose(self.scope(id)));
        if previous.as_ref() != self.workspace.active_id() {
            self.active_changed();
            self.refresh_active_if_stale().await;
        }
        true
    }

    async fn refresh_active_if_stale(&mut self) {
        let Some(active) = self
            .workspace
            .active_buffer()
            .filter(|tab| tab.is_stale() && !tab.is_dirty())
            .map(|tab| tab.file_id().clone())
        else {
            return;
        };
        if let Err(err) = self.workspace.refresh(&active).await {
            warn!(target: "codecollab::sync", file = %active, error = %err, "refetch of stale tab failed");
        }
    }

    pub async fn create_file(
        &mut self,
        name: &str,
        kind: FileKind,
        parent: Option<FileId>,
    ) -> Result<FileId, WorkspaceError> {
        self.workspace.create_file(name, kind, parent).await
    }

    pub async fn delete_file(&mut self, id: &FileId) -> Result<Vec<FileId>, WorkspaceError> {
        let previous = self.workspace.active_id().cloned();
        let closed = self.workspace.delete_file(id).await?;
        for file in &closed {
            self.outbox.emit(ClientEvent::FileClose(self.scope(file)));
        }
        if previous.as_ref() != self.workspace.active_id() {
            self.active_changed();
            self.refresh_active_if_stale().await;
        }
        Ok(closed)
    }

    /// Applies a local edit batch to the active buffer and broadcasts the
    /// changes that took effect. Returns how many applied.
    pub fn apply_local_edit(&mut self, changes: Vec<TextChange>) -> Result<usize, WorkspaceError> {
        let project_id = self.project.id.clone();
        let buffer = self
            .workspace
            .active_buffer_mut()
            .ok_or(WorkspaceError::NoActiveFile)?;
        let applied = buffer.apply_local(changes);
        if applied.is_empty() {
            return Ok(0);
        }
        let count = applied.len();
        let event = ClientEvent::CodeChange(CodeChange {
            project_id,
            file_id: buffer.file_id().clone(),
            changes: applied,
            version: buffer.version(),
        });
        self.outbox.emit(event);
        Ok(count)
    }

    /// Applies a peer's edit batch. Self-echoes are dropped; edits for a
    /// background tab only flag it stale.
    pub fn apply_remote_edit(&mut self, update: CodeUpdated) -> RemoteEditOutcome {
        if self.origin.is_self_echo(&update) {
            debug!(target: "codecollab::sync", file = %update.file_id, "self echo dropped");
            return RemoteEditOutcome::SelfEcho;
        }
        if self.workspace.active_id() == Some(&update.file_id) {
            if let Some(buffer) = self.workspace.active_buffer_mut() {
                let applied = buffer.apply_remote(&update.changes);
                debug!(target: "codecollab::sync", file = %update.file_id, user = %update.user_id, applied = applied.applied, dropped = applied.dropped, "remote edit");
                return RemoteEditOutcome::Applied(applied);
            }
        }
        match self.workspace.buffer_mut(&update.file_id) {
            Some(buffer) => {
                buffer.mark_stale();
                RemoteEditOutcome::MarkedStale
            }
            None => {
                debug!(target: "codecollab::sync", file = %update.file_id, "edit for unopened file dropped");
                RemoteEditOutcome::NotOpen
            }
        }
    }

    pub async fn save_active(&mut self) -> Result<SaveOutcome, WorkspaceError> {
        let id = self
            .workspace
            .active_id()
            .cloned()
            .ok_or(WorkspaceError::NoActiveFile)?;
        self.save(&id).await
    }

    /// Persists a buffer, then tells the room it was saved.
    pub async fn save(&mut self, id: &FileId) -> Result<SaveOutcome, WorkspaceError> {
        let outcome = self.workspace.save(id).await?;
        self.outbox.emit(ClientEvent::FileSave(FileSave {
            project_id: self.project.id.clone(),
            file_id: id.clone(),
            content: outcome.content.clone(),
        }));
        Ok(outcome)
    }

    /// Moves the local caret in the active file and broadcasts it, subject
    /// to the debounce interval.
    pub fn move_cursor(&mut self, position: Position, now: Instant) -> Option<Position> {
        let buffer = self.workspace.active_buffer_mut()?;
        let position = buffer.set_cursor(position);
        let file = buffer.file_id().clone();
        if let Some((file, position)) = self.broadcaster.moved(file, position, now) {
            self.emit_cursor(file, position);
        }
        Some(position)
    }

    /// Releases a cursor move held back by the debounce interval.
    pub fn tick(&mut self, now: Instant) {
        if let Some((file, position)) = self.broadcaster.flush(now) {
            if self.workspace.active_id() == Some(&file) {
                self.emit_cursor(file, position);
            }
        }
    }

    fn emit_cursor(&self, file_id: FileId, position: Position) {
        self.outbox.emit(ClientEvent::CursorUpdate(CursorUpdate {
            project_id: self.project.id.clone(),
            file_id,
            position,
        }));
    }

    /// Asks for an AI completion at the caret and inserts it as a local
    /// edit. Returns the caret after insertion, or `None` when the
    /// suggestion was blank.
    pub async fn complete_at_cursor(&mut self) -> Result<Option<Position>, WorkspaceError> {
        let request = {
            let buffer = self
                .workspace
                .active_buffer()
                .ok_or(WorkspaceError::NoActiveFile)?;
            let cursor = buffer.cursor();
            CompletionRequest {
                code: buffer.content().to_string(),
                language: self.language_of(buffer.language()),
                cursor_position: CursorPosition {
                    line: cursor.line,
                    column: cursor.column,
                },
            }
        };
        let suggestion = self.api.complete(&request).await?;
        if suggestion.trim().is_empty() {
            return Ok(None);
        }
        let at = Position::new(request.cursor_position.line, request.cursor_position.column);
        if self.apply_local_edit(vec![TextChange::insert(at, suggestion.clone())])? == 0 {
            return Ok(None);
        }
        let caret = position_after(at, &suggestion);
        Ok(self.move_cursor(caret, Instant::now()))
    }

    fn language_of(&self, file_language: Option<&str>) -> String {
        file_language
            .or(self.project.language.as_deref())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string()
    }

    fn execution_request(&self, input: &str) -> Result<ExecuteRequest, ExecutionError> {
        let buffer = self
            .workspace
            .active_buffer()
            .ok_or(ExecutionError::NothingToRun)?;
        Ok(ExecuteRequest {
            code: buffer.content().to_string(),
            language: self.language_of(buffer.language()),
            input: input.to_string(),
            project_id: Some(self.project.id.clone()),
            file_id: Some(buffer.file_id().clone()),
        })
    }

    /// Claims the execution slot for the active file's current text. The
    /// caller sends the request and settles with [`Self::finish_execution`].
    pub fn begin_execution(
        &mut self,
        input: &str,
    ) -> Result<(RunTicket, ExecuteRequest), ExecutionError> {
        let request = self.execution_request(input)?;
        let ticket = self.execution.begin()?;
        Ok((ticket, request))
    }

    pub fn finish_execution(
        &mut self,
        ticket: RunTicket,
        outcome: Result<ExecutionRecord, &ApiError>,
    ) -> bool {
        self.execution.finish(ticket, outcome)
    }

    /// Runs the active file and waits for the REST answer.
    pub async fn run_active(&mut self, input: &str) -> Result<&ExecutionResult, ExecutionError> {
        let request = self.execution_request(input)?;
        self.execution.run(self.api.as_ref(), &request).await
    }

    pub async fn send_chat(&mut self, text: &str) -> Result<Option<MessageId>, ChatError> {
        match self.chat.as_mut() {
            Some(chat) => chat.send_text(text).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn send_voice(
        &mut self,
        bytes: Vec<u8>,
        duration_seconds: u32,
    ) -> Result<Option<MessageId>, ChatError> {
        match self.chat.as_mut() {
            Some(chat) => chat.send_audio(bytes, duration_seconds).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consumes one session event. Events from any connection other than
    /// the current one are dropped.
    pub async fn handle_session_event(&mut self, event: SessionEvent) -> RoomUpdate {
        match event {
            SessionEvent::Connected {
                epoch,
                connection_id,
            } => {
                if self.epoch == Some(epoch) {
                    return RoomUpdate::Ignored;
                }
                self.origin.attach(connection_id);
                self.epoch = Some(epoch);
                self.resync().await;
                RoomUpdate::Connection
            }
            SessionEvent::Disconnected { epoch, .. } => {
                if self.epoch == Some(epoch) {
                    self.origin.detach();
                }
                RoomUpdate::Connection
            }
            SessionEvent::Unauthorized => {
                self.origin.detach();
                RoomUpdate::Connection
            }
            SessionEvent::Message { epoch, event } => {
                if self.epoch != Some(epoch) || self.origin.local().is_none() {
                    debug!(target: "codecollab::sync", epoch, event = event.name(), "dropping event from a previous connection");
                    return RoomUpdate::Ignored;
                }
                let update = self.handle(event);
                if update == RoomUpdate::Tree {
                    self.refresh_active_if_stale().await;
                }
                update
            }
        }
    }

    /// Re-joins rooms on a fresh connection and resets ephemeral state.
    async fn resync(&mut self) {
        info!(target: "codecollab::sync", project = %self.project.id, "re-joining after reconnect");
        self.outbox.emit(ClientEvent::JoinProject(self.membership()));
        if let Some(chat) = self.chat.as_ref() {
            chat.rejoin();
        }
        self.presence.clear();
        self.cursors.clear();
        if let Some(active) = self.workspace.mark_clean_tabs_stale() {
            self.outbox.emit(ClientEvent::FileOpen(self.scope(&active)));
            if let Err(err) = self.workspace.refresh(&active).await {
                warn!(target: "codecollab::sync", file = %active, error = %err, "refetch after reconnect failed");
            }
        }
    }

    /// Applies one inbound event from the current connection.
    pub fn handle(&mut self, event: ServerEvent) -> RoomUpdate {
        match event {
            ServerEvent::Connected(_) => RoomUpdate::Ignored,
            ServerEvent::Error(payload) => {
                warn!(target: "codecollab::sync", message = %payload.message, "server error");
                RoomUpdate::Ignored
            }
            event @ ServerEvent::NewMessage(_) => {
                match self.chat.as_mut().and_then(|chat| chat.handle(&event)) {
                    Some(outcome) => RoomUpdate::Chat(outcome),
                    None => RoomUpdate::Ignored,
                }
            }
            // Global chat traffic; not this room's concern.
            ServerEvent::Message(_) => RoomUpdate::Ignored,
            ServerEvent::UserJoined(user) => {
                self.presence.join(user);
                RoomUpdate::Presence
            }
            ServerEvent::UserLeft(left) => {
                self.presence.leave(&left.user_id, &mut self.cursors);
                RoomUpdate::Presence
            }
            ServerEvent::ProjectUsers(users) => {
                self.presence.replace_all(users.active_users);
                RoomUpdate::Presence
            }
            ServerEvent::FileCreated(created) => {
                if self.workspace.apply_remote_created(created.file) {
                    RoomUpdate::Tree
                } else {
                    RoomUpdate::Ignored
                }
            }
            ServerEvent::FileDeleted(deleted) => {
                let previous = self.workspace.active_id().cloned();
                let closed = self.workspace.apply_remote_deleted(&deleted.file_id);
                if previous.as_ref() != self.workspace.active_id() {
                    self.active_changed();
                }
                debug!(target: "codecollab::workspace", file = %deleted.file_id, closed = closed.len(), "remote delete");
                RoomUpdate::Tree
            }
            ServerEvent::FileRenamed(renamed) => {
                if self.workspace.apply_remote_renamed(renamed) {
                    RoomUpdate::Tree
                } else {
                    RoomUpdate::Ignored
                }
            }
            ServerEvent::CodeUpdated(update) => RoomUpdate::Document(self.apply_remote_edit(update)),
            ServerEvent::CursorMoved(moved) => RoomUpdate::Cursor(self.cursors.apply_remote(
                moved,
                self.workspace.active_id(),
                &self.origin,
            )),
            ServerEvent::ExecutionComplete(record) => {
                if self.execution.complete_from_socket(record) {
                    RoomUpdate::Execution
                } else {
                    RoomUpdate::Ignored
                }
            }
        }
    }
}
