//! Transport session: one authenticated socket per signed-in user.
//!
//! A background driver owns the link, reconnects with backoff, decodes
//! inbound frames into [`ServerEvent`]s stamped with the connection epoch,
//! and writes whatever the [`Outbox`] queues while a link is up.

use crate::config::ReconnectPolicy;
use crate::transport::{Connector, FrameSink, SocketLink, TransportError};
use collab_proto::{
    decode_server_event, encode_client_event, ClientEvent, ConnectionId, FrameError, ServerEvent,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected { connection_id: ConnectionId },
    Disconnected,
    /// The driver stopped: closed locally or credentials rejected.
    Closed,
}

impl ConnectionState {
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            ConnectionState::Connected { connection_id } => Some(connection_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        epoch: u64,
        connection_id: ConnectionId,
    },
    Disconnected {
        epoch: u64,
        reason: String,
    },
    /// The server refused the token; the session will not reconnect.
    Unauthorized,
    Message {
        epoch: u64,
        event: ServerEvent,
    },
}

/// Fire-and-forget sender for outbound events.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Outbox {
    /// Detached outbox plus the receiving end, for driving state without a socket.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(target: "codecollab::session", event = name, "session ended; dropping outbound event");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: Url,
    pub token: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

pub struct Session {
    outbox: Outbox,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Session {
    pub fn start(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let (outbox, outbound) = Outbox::channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            connector,
            config,
            outbound,
            events: events_tx,
            state: state_tx,
            epoch: 0,
        };
        let task = tokio::spawn(driver.run(shutdown_rx));
        Self {
            outbox,
            events,
            state,
            shutdown: Some(shutdown),
            task,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Stops the driver and waits for it to release the link.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

enum LinkEnd {
    Shutdown,
    Lost(String),
}

struct Driver {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    epoch: u64,
}

impl Driver {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt: u32 = 0;
        loop {
            let _ = self.state.send(ConnectionState::Connecting);
            let connect = self.connector.connect(&self.config.url, &self.config.token);
            match tokio::time::timeout(self.config.connect_timeout, connect).await {
                Ok(Ok(link)) => {
                    attempt = 0;
                    self.epoch += 1;
                    match self.pump(link, &mut shutdown).await {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(reason) => {
                            warn!(target: "codecollab::session", epoch = self.epoch, %reason, "connection lost");
                            let _ = self.state.send(ConnectionState::Disconnected);
                            if self
                                .events
                                .send(SessionEvent::Disconnected {
                                    epoch: self.epoch,
                                    reason,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                Ok(Err(TransportError::Unauthorized)) => {
                    warn!(target: "codecollab::session", "socket handshake rejected credentials");
                    let _ = self.events.send(SessionEvent::Unauthorized);
                    break;
                }
                Ok(Err(err)) => {
                    warn!(target: "codecollab::session", error = %err, attempt, "connect failed");
                    let _ = self.state.send(ConnectionState::Disconnected);
                }
                Err(_) => {
                    warn!(target: "codecollab::session", attempt, "connect timed out");
                    let _ = self.state.send(ConnectionState::Disconnected);
                }
            }

            let delay = self.config.reconnect.delay(attempt);
            attempt = attempt.saturating_add(1);
            if !self.back_off(delay, &mut shutdown).await {
                break;
            }
        }
        let _ = self.state.send(ConnectionState::Closed);
        debug!(target: "codecollab::session", "session driver stopped");
    }

    /// Waits out the reconnect delay, dropping anything queued meanwhile.
    /// Returns false once the session should stop.
    async fn back_off(&mut self, delay: Duration, shutdown: &mut oneshot::Receiver<()>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => return false,
                queued = self.outbound.recv() => match queued {
                    Some(event) => {
                        debug!(target: "codecollab::session", event = event.name(), "not connected; dropping outbound event");
                    }
                    None => return false,
                },
                _ = &mut sleep => return !self.events.is_closed(),
            }
        }
    }

    async fn pump(&mut self, link: SocketLink, shutdown: &mut oneshot::Receiver<()>) -> LinkEnd {
        let SocketLink { mut sink, mut stream } = link;
        let epoch = self.epoch;
        loop {
            tokio::select! {
                biased;
                queued = self.outbound.recv() => {
                    let Some(event) = queued else {
                        let _ = sink.close().await;
                        return LinkEnd::Shutdown;
                    };
                    if let Err(err) = send_event(&mut sink, &event).await {
                        return LinkEnd::Lost(err.to_string());
                    }
                }
                _ = &mut *shutdown => {
                    self.flush_queued(&mut sink).await;
                    let _ = sink.close().await;
                    return LinkEnd::Shutdown;
                }
                inbound = stream.next() => {
                    let frame = match inbound {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => return LinkEnd::Lost(err.to_string()),
                        None => return LinkEnd::Lost("stream ended".into()),
                    };
                    let event = match decode_server_event(&frame) {
                        Ok(event) => event,
                        Err(FrameError::UnknownEvent(name)) => {
                            debug!(target: "codecollab::session", event = %name, "ignoring unknown event");
                            continue;
                        }
                        Err(err) => {
                            warn!(target: "codecollab::session", error = %err, "dropping malformed frame");
                            continue;
                        }
                    };
                    if !self.deliver(epoch, event) {
                        let _ = sink.close().await;
                        return LinkEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Writes whatever was queued before shutdown, so leave events reach
    /// the server ahead of the close frame.
    async fn flush_queued(&mut self, sink: &mut FrameSink) {
        while let Ok(event) = self.outbound.try_recv() {
            if let Err(err) = send_event(sink, &event).await {
                debug!(target: "codecollab::session", event = event.name(), error = %err, "link closed while flushing");
                return;
            }
        }
    }

    fn deliver(&mut self, epoch: u64, event: ServerEvent) -> bool {
        let session_event = match event {
            ServerEvent::Connected(payload) => {
                info!(target: "codecollab::session", epoch, connection = %payload.socket_id, "connected");
                let _ = self.state.send(ConnectionState::Connected {
                    connection_id: payload.socket_id.clone(),
                });
                SessionEvent::Connected {
                    epoch,
                    connection_id: payload.socket_id,
                }
            }
            event => {
                if let ServerEvent::Error(payload) = &event {
                    warn!(target: "codecollab::session", message = %payload.message, "server reported an error");
                }
                trace!(target: "codecollab::session", event = event.name(), "recv");
                SessionEvent::Message { epoch, event }
            }
        };
        self.events.send(session_event).is_ok()
    }
}

async fn send_event(sink: &mut FrameSink, event: &ClientEvent) -> Result<(), TransportError> {
    let frame = match encode_client_event(event) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(target: "codecollab::session", event = event.name(), error = %err, "failed to encode outbound event");
            return Ok(());
        }
    };
    trace!(target: "codecollab::session", event = event.name(), "send");
    sink.send(frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnector;
    use collab_proto::{ChatId, ProjectId, ProjectMembership, UserId};

    fn config() -> SessionConfig {
        SessionConfig {
            url: Url::parse("ws://collab.test/ws").unwrap(),
            token: "tok".into(),
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(20),
            },
        }
    }

    const HELLO_A: &str = r#"{"event":"connected","data":{"socketId":"sock-a"}}"#;
    const HELLO_B: &str = r#"{"event":"connected","data":{"socketId":"sock-b"}}"#;

    #[test_timeout::tokio_timeout_test(10)]
    async fn handshake_sets_connection_id_and_forwards_events() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut session = Session::start(Arc::new(connector), config());

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.token, "tok");
        peer.push(HELLO_A);

        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Connected {
                epoch: 1,
                connection_id: ConnectionId::new("sock-a"),
            })
        );
        assert_eq!(
            session.state().connection_id(),
            Some(&ConnectionId::new("sock-a"))
        );

        session.outbox().emit(ClientEvent::Join(ChatId::new("c1")));
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame, r#"{"event":"join","data":"c1"}"#);

        peer.push(r#"{"event":"user_left","data":{"userId":"u2"}}"#);
        match session.next_event().await {
            Some(SessionEvent::Message { epoch: 1, event }) => {
                assert_eq!(event.name(), "user_left");
            }
            other => panic!("unexpected {other:?}"),
        }
        session.close().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn unknown_and_malformed_frames_are_skipped() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut session = Session::start(Arc::new(connector), config());
        let peer = peers.recv().await.unwrap();
        peer.push(HELLO_A);
        peer.push(r#"{"event":"typing","data":{}}"#);
        peer.push("not json");
        peer.push(r#"{"event":"file_deleted","data":{"fileId":"f1"}}"#);

        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Connected { .. })
        ));
        match session.next_event().await {
            Some(SessionEvent::Message { event, .. }) => assert_eq!(event.name(), "file_deleted"),
            other => panic!("unexpected {other:?}"),
        }
        session.close().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn reconnect_bumps_epoch_and_drops_queued_events() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut session = Session::start(Arc::new(connector), config());

        let first = peers.recv().await.unwrap();
        first.push(HELLO_A);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Connected { epoch: 1, .. })
        ));

        drop(first);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Disconnected { epoch: 1, .. })
        ));
        session.outbox().emit(ClientEvent::JoinProject(ProjectMembership {
            project_id: ProjectId::new("p1"),
            user_id: UserId::new("u1"),
        }));

        let mut second = peers.recv().await.unwrap();
        second.push(HELLO_B);
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Connected {
                epoch: 2,
                connection_id: ConnectionId::new("sock-b"),
            })
        );

        session.outbox().emit(ClientEvent::Leave(ChatId::new("c9")));
        assert_eq!(
            second.next_frame().await.unwrap(),
            r#"{"event":"leave","data":"c9"}"#
        );
        session.close().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn events_queued_before_close_are_written() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut session = Session::start(Arc::new(connector), config());
        let mut peer = peers.recv().await.unwrap();
        peer.push(HELLO_A);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Connected { .. })
        ));

        let outbox = session.outbox();
        outbox.emit(ClientEvent::LeaveProject(ProjectMembership {
            project_id: ProjectId::new("p1"),
            user_id: UserId::new("u1"),
        }));
        outbox.emit(ClientEvent::Leave(ChatId::new("c1")));
        session.close().await;

        let mut frames = Vec::new();
        while let Some(frame) = peer.next_frame().await {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                r#"{"event":"leave_project","data":{"projectId":"p1","userId":"u1"}}"#.to_string(),
                r#"{"event":"leave","data":"c1"}"#.to_string(),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn refused_connects_are_retried() {
        let (connector, mut peers) = MemoryConnector::new();
        connector.refuse_next(2);
        let mut session = Session::start(Arc::new(connector), config());

        let peer = peers.recv().await.unwrap();
        peer.push(HELLO_A);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Connected { epoch: 1, .. })
        ));
        session.close().await;
    }
}
