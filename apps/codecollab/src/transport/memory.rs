//! In-process connector: each connection hands the test a [`MemoryPeer`]
//! standing in for the server end.

use super::{Connector, SocketLink, TransportError};
use async_trait::async_trait;
use futures_util::{sink, stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Server end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: Url,
    pub token: String,
    /// Frames written by the client.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client. Dropping it closes the connection.
    pub to_client: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refusals: Arc::new(AtomicUsize::new(0)),
            },
            accepted,
        )
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url, token: &str) -> Result<SocketLink, TransportError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
        self.peers
            .send(MemoryPeer {
                url: url.clone(),
                token: token.to_string(),
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::Connect("no listener".into()))?;

        let sink = sink::unfold(client_tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(SocketLink::new(Box::pin(sink), Box::pin(stream)))
    }
}
