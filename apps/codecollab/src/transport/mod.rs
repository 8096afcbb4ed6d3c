//! Socket links carrying JSON frames between the client and the server.

pub mod memory;
mod websocket;

pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use collab_proto::FrameError;
use futures_util::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("server rejected the credentials")]
    Unauthorized,
    #[error("connection closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One live connection, split so reads and writes can be polled together.
pub struct SocketLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl SocketLink {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection authenticated with `token`.
    async fn connect(&self, url: &Url, token: &str) -> Result<SocketLink, TransportError>;
}
