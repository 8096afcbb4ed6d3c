//! Wire protocol shared by codecollab clients and test servers.
//!
//! Socket traffic is a stream of JSON text frames shaped as
//! `{"event": "<name>", "data": <payload>}`. Outbound traffic is modelled by
//! [`ClientEvent`], inbound traffic by [`ServerEvent`]; both are closed enums so
//! adding an event kind is a compile-checked change for every handler.
//! The record types mirror what the REST API returns and what the socket
//! server relays, including the Mongo-style `_id` keys.

mod events;
mod frame;
mod geometry;
mod ids;
mod records;

pub use events::{
    ClientEvent, CodeChange, CodeUpdated, ConnectedPayload, CursorMoved, CursorUpdate,
    ErrorPayload, FileCreated, FileDeleted, FileRenamed, FileSave, FileScope, PresenceUser,
    ProjectMembership, ProjectUsers, ServerEvent, UserLeft,
};
pub use frame::{
    FrameError, decode_client_event, decode_server_event, encode_client_event,
    encode_server_event,
};
pub use geometry::{EditRange, Position, TextChange};
pub use ids::{ChatId, ConnectionId, FileId, MessageId, ProjectId, UserId};
pub use records::{
    AuthRecord, ChatRecord, ChatRef, ChatSummary, ExecutionOutputRecord, ExecutionRecord,
    FileKind, FileRecord, MessageKind, MessageRecord, ProjectRecord, UserRecord, UserRef,
};
