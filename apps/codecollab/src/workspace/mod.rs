//! File tree, open tabs and the active selection for one project.

mod tree;

pub use tree::{FileNode, FileTree, TreeError};

use crate::api::{ApiError, CollabApi, NewFile};
use crate::document::OpenFileBuffer;
use collab_proto::{FileId, FileKind, FileRecord, FileRenamed, ProjectId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("file {0} is not part of this project")]
    UnknownFile(FileId),
    #[error("{0} is a folder")]
    NotAFile(FileId),
    #[error("file {0} is not open")]
    NotOpen(FileId),
    #[error("no file is active")]
    NoActiveFile,
    #[error("name cannot be empty")]
    EmptyName,
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl WorkspaceError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, WorkspaceError::Api(err) if err.is_unauthorized())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new tab was created from fetched content.
    Opened,
    /// The file already had a tab; it is now active.
    Activated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub content: String,
    /// False when the buffer changed while the save was in flight.
    pub clean: bool,
}

pub struct Workspace {
    api: Arc<dyn CollabApi>,
    project_id: ProjectId,
    tree: FileTree,
    tabs: Vec<OpenFileBuffer>,
    active: Option<FileId>,
}

impl Workspace {
    pub fn new(api: Arc<dyn CollabApi>, project_id: ProjectId, files: Vec<FileRecord>) -> Self {
        Self {
            api,
            project_id,
            tree: FileTree::from_records(files),
            tabs: Vec::new(),
            active: None,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Open tabs, oldest first.
    pub fn tabs(&self) -> &[OpenFileBuffer] {
        &self.tabs
    }

    pub fn active_id(&self) -> Option<&FileId> {
        self.active.as_ref()
    }

    pub fn buffer(&self, id: &FileId) -> Option<&OpenFileBuffer> {
        self.tabs.iter().find(|tab| tab.file_id() == id)
    }

    pub fn buffer_mut(&mut self, id: &FileId) -> Option<&mut OpenFileBuffer> {
        self.tabs.iter_mut().find(|tab| tab.file_id() == id)
    }

    pub fn active_buffer(&self) -> Option<&OpenFileBuffer> {
        self.active.as_ref().and_then(|id| self.buffer(id))
    }

    pub fn active_buffer_mut(&mut self) -> Option<&mut OpenFileBuffer> {
        let id = self.active.clone()?;
        self.buffer_mut(&id)
    }

    pub fn is_open(&self, id: &FileId) -> bool {
        self.buffer(id).is_some()
    }

    /// Opens or focuses a tab. Content is fetched before a new tab appears,
    /// so a failed fetch leaves the tabs untouched.
    pub async fn open_file(&mut self, id: &FileId) -> Result<OpenOutcome, WorkspaceError> {
        if self.is_open(id) {
            self.active = Some(id.clone());
            let needs_refresh = self
                .buffer(id)
                .map(|tab| tab.is_stale() && !tab.is_dirty())
                .unwrap_or(false);
            if needs_refresh {
                self.refresh(id).await?;
            }
            return Ok(OpenOutcome::Activated);
        }

        let node = self
            .tree
            .get(id)
            .ok_or_else(|| WorkspaceError::UnknownFile(id.clone()))?;
        if node.is_folder() {
            return Err(WorkspaceError::NotAFile(id.clone()));
        }
        let (name, language) = (node.name.clone(), node.language.clone());

        let record = self.api.get_file(&self.project_id, id).await?;
        let buffer = OpenFileBuffer::new(
            id.clone(),
            name,
            record.language.or(language),
            record.content.unwrap_or_default(),
        );
        debug!(target: "codecollab::workspace", file = %id, "opened tab");
        self.tabs.push(buffer);
        self.active = Some(id.clone());
        Ok(OpenOutcome::Opened)
    }

    /// Closes a tab. If it was active, the most recently opened remaining
    /// tab takes over.
    pub fn close_file(&mut self, id: &FileId) -> bool {
        let before = self.tabs.len();
        self.tabs.retain(|tab| tab.file_id() != id);
        if self.tabs.len() == before {
            return false;
        }
        if self.active.as_ref() == Some(id) {
            self.active = self.tabs.last().map(|tab| tab.file_id().clone());
        }
        debug!(target: "codecollab::workspace", file = %id, active = ?self.active, "closed tab");
        true
    }

    /// Creates a file or folder on the server, then records it locally.
    pub async fn create_file(
        &mut self,
        name: &str,
        kind: FileKind,
        parent: Option<FileId>,
    ) -> Result<FileId, WorkspaceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkspaceError::EmptyName);
        }
        self.tree.validate_parent(parent.as_ref())?;
        let record = self
            .api
            .create_file(
                &self.project_id,
                &NewFile {
                    name: name.to_string(),
                    kind,
                    parent,
                },
            )
            .await?;
        let id = record.id.clone();
        self.tree.insert(record.into())?;
        info!(target: "codecollab::workspace", file = %id, name, "created");
        Ok(id)
    }

    /// Deletes on the server, then drops the node, its descendants and
    /// their tabs. Returns the tabs that were closed.
    pub async fn delete_file(&mut self, id: &FileId) -> Result<Vec<FileId>, WorkspaceError> {
        if !self.tree.contains(id) {
            return Err(WorkspaceError::UnknownFile(id.clone()));
        }
        self.api.delete_file(&self.project_id, id).await?;
        info!(target: "codecollab::workspace", file = %id, "deleted");
        Ok(self.forget(id))
    }

    /// Persists the full content of an open buffer.
    pub async fn save(&mut self, id: &FileId) -> Result<SaveOutcome, WorkspaceError> {
        let ticket = self
            .buffer(id)
            .map(|tab| tab.begin_save())
            .ok_or_else(|| WorkspaceError::NotOpen(id.clone()))?;
        if let Err(err) = self
            .api
            .save_file(&self.project_id, id, &ticket.content)
            .await
        {
            warn!(target: "codecollab::workspace", file = %id, error = %err, "save failed; buffer stays dirty");
            return Err(err.into());
        }
        let clean = self
            .buffer_mut(id)
            .map(|tab| tab.finish_save(&ticket))
            .unwrap_or(false);
        debug!(target: "codecollab::workspace", file = %id, clean, "saved");
        Ok(SaveOutcome {
            content: ticket.content,
            clean,
        })
    }

    /// Replaces an open buffer with the server's content.
    pub async fn refresh(&mut self, id: &FileId) -> Result<(), WorkspaceError> {
        if !self.is_open(id) {
            return Err(WorkspaceError::NotOpen(id.clone()));
        }
        let record = self.api.get_file(&self.project_id, id).await?;
        if let Some(tab) = self.buffer_mut(id) {
            tab.reload(record.content.unwrap_or_default());
        }
        Ok(())
    }

    /// Flags every clean tab for refetch. Returns the active tab's id when it
    /// needs reloading now.
    pub fn mark_clean_tabs_stale(&mut self) -> Option<FileId> {
        for tab in self.tabs.iter_mut().filter(|tab| !tab.is_dirty()) {
            tab.mark_stale();
        }
        self.active_buffer()
            .filter(|tab| tab.is_stale())
            .map(|tab| tab.file_id().clone())
    }

    pub fn apply_remote_created(&mut self, record: FileRecord) -> bool {
        let id = record.id.clone();
        match self.tree.insert(record.into()) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "codecollab::workspace", file = %id, error = %err, "ignoring remote file_created");
                false
            }
        }
    }

    /// Returns the tabs closed as a consequence.
    pub fn apply_remote_deleted(&mut self, id: &FileId) -> Vec<FileId> {
        self.forget(id)
    }

    pub fn apply_remote_renamed(&mut self, renamed: FileRenamed) -> bool {
        let FileRenamed {
            file_id,
            new_name,
            language,
        } = renamed;
        if !self.tree.rename(&file_id, new_name.clone(), language.clone()) {
            debug!(target: "codecollab::workspace", file = %file_id, "rename for unknown file");
            return false;
        }
        if let Some(tab) = self.buffer_mut(&file_id) {
            tab.rename(new_name, language);
        }
        true
    }

    fn forget(&mut self, id: &FileId) -> Vec<FileId> {
        let removed = self.tree.remove(id);
        removed
            .into_iter()
            .filter(|gone| self.close_file(gone))
            .collect()
    }
}
