//! Remote cursor annotations and local cursor broadcast.

use crate::origin::OriginFilter;
use collab_proto::{ConnectionId, CursorMoved, FileId, Position, UserId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub file_id: FileId,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    Inserted,
    Replaced,
    IgnoredSelfEcho,
    IgnoredOtherFile,
}

/// One marker per remote connection.
#[derive(Debug, Clone, Default)]
pub struct CursorLayer {
    cursors: BTreeMap<ConnectionId, RemoteCursor>,
}

impl CursorLayer {
    pub fn apply_remote(
        &mut self,
        moved: CursorMoved,
        active_file: Option<&FileId>,
        origin: &OriginFilter,
    ) -> CursorOutcome {
        if origin.is_self_echo(&moved) {
            return CursorOutcome::IgnoredSelfEcho;
        }
        if active_file != Some(&moved.file_id) {
            trace!(target: "codecollab::sync", file = %moved.file_id, "cursor for inactive file ignored");
            return CursorOutcome::IgnoredOtherFile;
        }
        let cursor = RemoteCursor {
            connection_id: moved.socket_id.clone(),
            user_id: moved.user_id,
            username: moved.username,
            file_id: moved.file_id,
            position: moved.position,
        };
        match self.cursors.insert(moved.socket_id, cursor) {
            Some(_) => CursorOutcome::Replaced,
            None => CursorOutcome::Inserted,
        }
    }

    pub fn get(&self, connection: &ConnectionId) -> Option<&RemoteCursor> {
        self.cursors.get(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.values()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Drops every cursor owned by `user`, across all of their connections.
    pub fn remove_user(&mut self, user: &UserId) -> usize {
        let before = self.cursors.len();
        self.cursors.retain(|_, cursor| &cursor.user_id != user);
        before - self.cursors.len()
    }

    /// Keeps only cursors placed in `file`.
    pub fn retain_file(&mut self, file: Option<&FileId>) {
        self.cursors.retain(|_, cursor| Some(&cursor.file_id) == file);
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}

/// Rate limiter for outbound cursor moves. With a zero interval every move
/// goes out; otherwise moves inside the window are held and the newest one
/// is released by [`CursorBroadcaster::flush`].
#[derive(Debug, Clone)]
pub struct CursorBroadcaster {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<(FileId, Position)>,
}

impl CursorBroadcaster {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    pub fn moved(
        &mut self,
        file: FileId,
        position: Position,
        now: Instant,
    ) -> Option<(FileId, Position)> {
        let ready = match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if ready {
            self.pending = None;
            self.last_sent = Some(now);
            Some((file, position))
        } else {
            self.pending = Some((file, position));
            None
        }
    }

    pub fn flush(&mut self, now: Instant) -> Option<(FileId, Position)> {
        let ready = self
            .last_sent
            .map(|last| now.saturating_duration_since(last) >= self.interval)
            .unwrap_or(true);
        if !ready {
            return None;
        }
        let pending = self.pending.take()?;
        self.last_sent = Some(now);
        Some(pending)
    }

    /// Forgets held moves, e.g. when the active file changes.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(socket: &str, user: &str, file: &str, line: u32, column: u32) -> CursorMoved {
        CursorMoved {
            file_id: file.into(),
            user_id: user.into(),
            socket_id: socket.into(),
            username: user.into(),
            position: Position::new(line, column),
        }
    }

    #[test_timeout::timeout]
    fn updates_are_keyed_by_connection() {
        let mut layer = CursorLayer::default();
        let origin = OriginFilter::default();
        let file = FileId::new("a.js");

        assert_eq!(
            layer.apply_remote(moved("s1", "u1", "a.js", 1, 1), Some(&file), &origin),
            CursorOutcome::Inserted
        );
        assert_eq!(
            layer.apply_remote(moved("s2", "u2", "a.js", 2, 5), Some(&file), &origin),
            CursorOutcome::Inserted
        );
        assert_eq!(layer.len(), 2);

        assert_eq!(
            layer.apply_remote(moved("s1", "u1", "a.js", 3, 1), Some(&file), &origin),
            CursorOutcome::Replaced
        );
        assert_eq!(layer.len(), 2);
        assert_eq!(
            layer.get(&"s1".into()).map(|c| c.position),
            Some(Position::new(3, 1))
        );
        assert_eq!(
            layer.get(&"s2".into()).map(|c| c.position),
            Some(Position::new(2, 5))
        );
    }

    #[test_timeout::timeout]
    fn self_echo_and_other_files_are_ignored() {
        let mut layer = CursorLayer::default();
        let mut origin = OriginFilter::default();
        origin.attach("me".into());
        let file = FileId::new("a.js");

        assert_eq!(
            layer.apply_remote(moved("me", "u1", "a.js", 1, 1), Some(&file), &origin),
            CursorOutcome::IgnoredSelfEcho
        );
        assert_eq!(
            layer.apply_remote(moved("s2", "u2", "b.js", 1, 1), Some(&file), &origin),
            CursorOutcome::IgnoredOtherFile
        );
        assert_eq!(
            layer.apply_remote(moved("s2", "u2", "a.js", 1, 1), None, &origin),
            CursorOutcome::IgnoredOtherFile
        );
        assert!(layer.is_empty());
    }

    #[test_timeout::timeout]
    fn broadcaster_without_interval_sends_every_move() {
        let mut broadcaster = CursorBroadcaster::new(Duration::ZERO);
        let now = Instant::now();
        assert!(broadcaster.moved("f".into(), Position::new(1, 1), now).is_some());
        assert!(broadcaster.moved("f".into(), Position::new(1, 2), now).is_some());
        assert!(broadcaster.flush(now).is_none());
    }

    #[test_timeout::timeout]
    fn broadcaster_holds_the_newest_move_inside_the_window() {
        let mut broadcaster = CursorBroadcaster::new(Duration::from_millis(50));
        let start = Instant::now();
        assert!(broadcaster.moved("f".into(), Position::new(1, 1), start).is_some());
        assert!(broadcaster.moved("f".into(), Position::new(1, 2), start).is_none());
        assert!(broadcaster.moved("f".into(), Position::new(1, 3), start).is_none());
        assert!(broadcaster.flush(start + Duration::from_millis(10)).is_none());

        let released = broadcaster.flush(start + Duration::from_millis(60));
        assert_eq!(released, Some(("f".into(), Position::new(1, 3))));
        assert!(broadcaster.flush(start + Duration::from_millis(200)).is_none());
    }
}
