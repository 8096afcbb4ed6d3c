//! Self-echo filtering keyed by the current connection id.

use collab_proto::{CodeUpdated, ConnectionId, CursorMoved};

/// Inbound mutations that carry the connection id of their author.
pub trait Originated {
    fn origin(&self) -> &ConnectionId;
}

impl Originated for CodeUpdated {
    fn origin(&self) -> &ConnectionId {
        &self.socket_id
    }
}

impl Originated for CursorMoved {
    fn origin(&self) -> &ConnectionId {
        &self.socket_id
    }
}

/// Holds the id of the live connection. Cleared the moment the connection
/// drops so a recycled id can never match.
#[derive(Debug, Clone, Default)]
pub struct OriginFilter {
    local: Option<ConnectionId>,
}

impl OriginFilter {
    pub fn attach(&mut self, connection: ConnectionId) {
        self.local = Some(connection);
    }

    pub fn detach(&mut self) {
        self.local = None;
    }

    pub fn local(&self) -> Option<&ConnectionId> {
        self.local.as_ref()
    }

    pub fn is_self_echo<E: Originated + ?Sized>(&self, event: &E) -> bool {
        self.local.as_ref() == Some(event.origin())
    }
}
