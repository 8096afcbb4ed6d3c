//! Who is in the room right now.

use crate::cursors::CursorLayer;
use collab_proto::{PresenceUser, UserId};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
}

impl From<PresenceUser> for PresenceEntry {
    fn from(user: PresenceUser) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
        }
    }
}

/// Room members in arrival order, at most one entry per user.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    members: Vec<PresenceEntry>,
}

impl PresenceTracker {
    pub fn members(&self) -> &[PresenceEntry] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.members.iter().any(|entry| &entry.user_id == user)
    }

    /// Installs the bulk membership baseline, discarding what was known before.
    pub fn replace_all(&mut self, users: Vec<PresenceUser>) {
        self.members.clear();
        for user in users {
            self.join(user);
        }
    }

    /// Returns false when the user was already present.
    pub fn join(&mut self, user: PresenceUser) -> bool {
        if self.contains(&user.user_id) {
            debug!(target: "codecollab::presence", user = %user.user_id, "duplicate join ignored");
            return false;
        }
        debug!(target: "codecollab::presence", user = %user.user_id, username = %user.username, "joined");
        self.members.push(user.into());
        true
    }

    /// Removes the user and every cursor any of their connections owned.
    pub fn leave(&mut self, user: &UserId, cursors: &mut CursorLayer) -> bool {
        let purged = cursors.remove_user(user);
        let before = self.members.len();
        self.members.retain(|entry| &entry.user_id != user);
        let removed = self.members.len() != before;
        if removed {
            debug!(target: "codecollab::presence", user = %user, purged, "left");
        } else {
            debug!(target: "codecollab::presence", user = %user, "leave for unknown user");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}
