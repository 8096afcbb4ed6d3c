//! Open file buffers and last-write-wins range replacement.
//!
//! Local edits land immediately and are handed back for broadcast; remote
//! edits are applied in arrival order, each against the text left by the
//! previous one. Overlapping concurrent edits are not transformed: the last
//! one applied wins.

mod buffer;

pub use buffer::{full_range, position_after, EditError, TextBuffer};

use collab_proto::{FileId, Position, TextChange};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteApply {
    pub applied: usize,
    pub dropped: usize,
}

/// Snapshot taken when a save starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTicket {
    pub file_id: FileId,
    pub content: String,
    pub version: u64,
}

/// One tab's worth of text.
#[derive(Debug, Clone)]
pub struct OpenFileBuffer {
    file_id: FileId,
    name: String,
    language: Option<String>,
    text: TextBuffer,
    dirty: bool,
    version: u64,
    stale: bool,
    cursor: Position,
}

impl OpenFileBuffer {
    pub fn new(
        file_id: FileId,
        name: impl Into<String>,
        language: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            file_id,
            name: name.into(),
            language,
            text: TextBuffer::new(content),
            dirty: false,
            version: 0,
            stale: false,
            cursor: Position::new(1, 1),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn content(&self) -> &str {
        self.text.as_str()
    }

    pub fn text(&self) -> &TextBuffer {
        &self.text
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Remote edits arrived while this tab was in the background.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn set_cursor(&mut self, position: Position) -> Position {
        self.cursor = self.text.clamp(position);
        self.cursor
    }

    pub(crate) fn rename(&mut self, name: String, language: Option<String>) {
        self.name = name;
        if language.is_some() {
            self.language = language;
        }
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Applies a local keystroke batch and returns the changes that took
    /// effect, in order, for broadcast.
    pub fn apply_local(&mut self, changes: Vec<TextChange>) -> Vec<TextChange> {
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            match self.text.apply(&change) {
                Ok(()) => applied.push(change),
                Err(err) => {
                    warn!(target: "codecollab::sync", file = %self.file_id, error = %err, "dropping local edit");
                }
            }
        }
        if !applied.is_empty() {
            self.dirty = true;
            self.version += 1;
            self.cursor = self.text.clamp(self.cursor);
        }
        applied
    }

    /// Applies a remote batch sequentially. Changes that cannot be placed are
    /// dropped and logged; the rest still apply.
    pub fn apply_remote(&mut self, changes: &[TextChange]) -> RemoteApply {
        let mut outcome = RemoteApply {
            applied: 0,
            dropped: 0,
        };
        for change in changes {
            match self.text.apply(change) {
                Ok(()) => outcome.applied += 1,
                Err(err) => {
                    outcome.dropped += 1;
                    warn!(target: "codecollab::sync", file = %self.file_id, error = %err, "dropping remote edit");
                }
            }
        }
        if outcome.applied > 0 {
            self.version += 1;
            self.cursor = self.text.clamp(self.cursor);
        }
        outcome
    }

    pub fn begin_save(&self) -> SaveTicket {
        SaveTicket {
            file_id: self.file_id.clone(),
            content: self.text.as_str().to_string(),
            version: self.version,
        }
    }

    /// Marks the buffer clean if nothing changed since `ticket` was taken.
    pub fn finish_save(&mut self, ticket: &SaveTicket) -> bool {
        if ticket.file_id == self.file_id && ticket.version == self.version {
            self.dirty = false;
            true
        } else {
            false
        }
    }

    /// Swaps in freshly fetched content.
    pub fn reload(&mut self, content: String) {
        self.text = TextBuffer::new(content);
        self.dirty = false;
        self.stale = false;
        self.version += 1;
        self.cursor = self.text.clamp(self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_proto::EditRange;

    fn buffer(content: &str) -> OpenFileBuffer {
        OpenFileBuffer::new("a.js".into(), "a.js", Some("javascript".into()), content)
    }

    #[test_timeout::timeout]
    fn local_edit_marks_dirty_and_returns_applied_changes() {
        let mut file = buffer("x=1");
        let applied = file.apply_local(vec![
            TextChange::insert(Position::new(1, 4), ";"),
            TextChange::insert(Position::new(9, 1), "lost"),
        ]);
        assert_eq!(applied, vec![TextChange::insert(Position::new(1, 4), ";")]);
        assert_eq!(file.content(), "x=1;");
        assert!(file.is_dirty());
        assert_eq!(file.version(), 1);
    }

    #[test_timeout::timeout]
    fn remote_batch_applies_sequentially() {
        let mut file = buffer("abc");
        let outcome = file.apply_remote(&[
            TextChange::insert(Position::new(1, 1), "12\n"),
            TextChange::replace(EditRange::new(2, 1, 2, 2), "A"),
        ]);
        assert_eq!(outcome, RemoteApply { applied: 2, dropped: 0 });
        assert_eq!(file.content(), "12\nAbc");
        assert!(!file.is_dirty());
    }

    #[test_timeout::timeout]
    fn save_only_cleans_when_unchanged_since_snapshot() {
        let mut file = buffer("x");
        file.apply_local(vec![TextChange::insert(Position::new(1, 2), "1")]);

        let ticket = file.begin_save();
        file.apply_local(vec![TextChange::insert(Position::new(1, 3), "2")]);
        assert!(!file.finish_save(&ticket));
        assert!(file.is_dirty());

        let ticket = file.begin_save();
        assert_eq!(ticket.content, "x12");
        assert!(file.finish_save(&ticket));
        assert!(!file.is_dirty());
    }

    #[test_timeout::timeout]
    fn reload_resets_state_and_clamps_cursor() {
        let mut file = buffer("line one\nline two");
        file.set_cursor(Position::new(2, 6));
        file.mark_stale();
        file.reload("short".into());
        assert!(!file.is_stale());
        assert_eq!(file.content(), "short");
        assert_eq!(file.cursor(), Position::new(1, 6));
    }
}
