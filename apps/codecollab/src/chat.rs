//! Per-room message stream: REST history merged with live pushes, deduplicated by id.

use crate::api::{ApiError, AudioMessage, CollabApi};
use crate::session::Outbox;
use collab_proto::{
    ChatId, ChatSummary, ClientEvent, MessageId, MessageKind, MessageRecord, ServerEvent, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("audio recording is empty")]
    EmptyAudio,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ChatError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ChatError::Api(err) if err.is_unauthorized())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    Audio {
        url: String,
        duration_seconds: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_username: Option<String>,
    pub body: MessageBody,
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageRejected {
    #[error("message has no sender")]
    NoSender,
    #[error("message has neither text nor audio")]
    NoBody,
}

impl TryFrom<MessageRecord> for ChatMessage {
    type Error = MessageRejected;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let sender = record.sender.ok_or(MessageRejected::NoSender)?;
        let audio_url = record.audio_url.filter(|url| !url.trim().is_empty());
        let wants_audio = record.message_type == Some(MessageKind::Audio) || audio_url.is_some();
        let body = if wants_audio {
            MessageBody::Audio {
                url: audio_url.ok_or(MessageRejected::NoBody)?,
                duration_seconds: record.audio_duration,
            }
        } else {
            let content = record
                .content
                .filter(|text| !text.trim().is_empty())
                .ok_or(MessageRejected::NoBody)?;
            MessageBody::Text(content)
        };
        Ok(ChatMessage {
            id: record.id,
            sender_id: sender.id().clone(),
            sender_username: sender.username().map(str::to_string),
            body,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Team-wide chat. Sends rely on the server's broadcast.
    Global,
    /// Chat embedded in a project. Sends are relayed with `send_message`.
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    Duplicate,
    Rejected,
    OtherRoom,
}

pub struct ChatStream {
    api: Arc<dyn CollabApi>,
    outbox: Outbox,
    chat_id: ChatId,
    kind: RoomKind,
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
    loaded: bool,
}

impl ChatStream {
    pub fn new(api: Arc<dyn CollabApi>, outbox: Outbox, chat_id: ChatId, kind: RoomKind) -> Self {
        Self {
            api,
            outbox,
            chat_id,
            kind,
            messages: Vec::new(),
            seen: HashSet::new(),
            loaded: false,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Joins the room and loads history the first time.
    pub async fn enter(&mut self) -> Result<(), ChatError> {
        self.outbox.emit(ClientEvent::Join(self.chat_id.clone()));
        if self.loaded {
            return Ok(());
        }
        let chat = self.api.get_chat(&self.chat_id).await?;
        let total = chat.messages.len();
        for record in chat.messages {
            self.merge(record);
        }
        self.loaded = true;
        info!(target: "codecollab::chat", chat = %self.chat_id, total, kept = self.messages.len(), "history loaded");
        Ok(())
    }

    /// Re-joins after a reconnect without reloading history.
    pub fn rejoin(&self) {
        self.outbox.emit(ClientEvent::Join(self.chat_id.clone()));
    }

    pub fn leave(&mut self) {
        self.outbox.emit(ClientEvent::Leave(self.chat_id.clone()));
    }

    /// Appends a message unless its id is already present or it is unusable.
    pub fn merge(&mut self, record: MessageRecord) -> MergeOutcome {
        if self.seen.contains(&record.id) {
            debug!(target: "codecollab::chat", message = %record.id, "duplicate message dropped");
            return MergeOutcome::Duplicate;
        }
        let id = record.id.clone();
        match ChatMessage::try_from(record) {
            Ok(message) => {
                self.seen.insert(id);
                self.messages.push(message);
                MergeOutcome::Appended
            }
            Err(reason) => {
                debug!(target: "codecollab::chat", message = %id, %reason, "discarding message");
                MergeOutcome::Rejected
            }
        }
    }

    /// Routes a live chat push. Messages tagged for another chat are ignored.
    pub fn handle(&mut self, event: &ServerEvent) -> Option<MergeOutcome> {
        let record = match event {
            ServerEvent::NewMessage(record) | ServerEvent::Message(record) => record,
            _ => return None,
        };
        if record.chat.as_ref().is_some_and(|chat| chat != &self.chat_id) {
            return Some(MergeOutcome::OtherRoom);
        }
        Some(self.merge(record.clone()))
    }

    pub async fn send_text(&mut self, content: &str) -> Result<MessageId, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let record = self.api.post_message(&self.chat_id, content).await?;
        Ok(self.accept_sent(record))
    }

    /// Uploads a recording, then posts it as an audio message.
    pub async fn send_audio(
        &mut self,
        bytes: Vec<u8>,
        duration_seconds: u32,
    ) -> Result<MessageId, ChatError> {
        if bytes.is_empty() {
            return Err(ChatError::EmptyAudio);
        }
        let file_name = format!("recording-{}.wav", uuid::Uuid::new_v4().simple());
        let upload = self.api.upload_audio(bytes, &file_name).await?;
        let record = self
            .api
            .post_audio_message(
                &self.chat_id,
                &AudioMessage {
                    audio_url: upload.audio_url,
                    audio_duration: duration_seconds,
                },
            )
            .await?;
        Ok(self.accept_sent(record))
    }

    fn accept_sent(&mut self, record: MessageRecord) -> MessageId {
        let id = record.id.clone();
        let relay = (self.kind == RoomKind::Project).then(|| record.clone());
        if self.merge(record) == MergeOutcome::Rejected {
            warn!(target: "codecollab::chat", message = %id, "server returned an unusable message");
        }
        if let Some(record) = relay {
            self.outbox.emit(ClientEvent::SendMessage(record));
        }
        id
    }
}

/// The first chat the server lists is the global one.
pub async fn global_chat(api: &dyn CollabApi) -> Result<Option<ChatSummary>, ChatError> {
    Ok(api.list_chats().await?.into_iter().next())
}
