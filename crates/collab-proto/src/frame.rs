use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn split_frame(text: &str, known: &[&str]) -> Result<Value, FrameError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    if !known.contains(&raw.event.as_str()) {
        return Err(FrameError::UnknownEvent(raw.event));
    }
    Ok(serde_json::json!({ "event": raw.event, "data": raw.data }))
}

pub fn encode_client_event(event: &ClientEvent) -> Result<String, FrameError> {
    serde_json::to_string(event).map_err(FrameError::from)
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, FrameError> {
    let value = split_frame(text, ClientEvent::NAMES)?;
    serde_json::from_value(value).map_err(FrameError::from)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, FrameError> {
    serde_json::to_string(event).map_err(FrameError::from)
}

/// Decodes one inbound frame. Event names this client does not know yield
/// [`FrameError::UnknownEvent`] so callers can skip them without treating the
/// connection as broken.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, FrameError> {
    let value = split_frame(text, ServerEvent::NAMES)?;
    serde_json::from_value(value).map_err(FrameError::from)
}
