use super::{Connector, SocketLink, TransportError};
use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};
use url::Url;

/// WebSocket connector sending the token as a bearer `Authorization` header.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url, token: &str) -> Result<SocketLink, TransportError> {
        let mut request = url.as_str().into_client_request()?;
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| TransportError::Connect(format!("invalid token header: {err}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (ws_stream, _) = connect_async(request).await.map_err(|err| match err {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                TransportError::Unauthorized
            }
            other => TransportError::from(other),
        })?;
        debug!(target: "codecollab::session", url = %url, "websocket connected");

        let (sink, stream) = ws_stream.split();
        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: String| future::ready(Ok::<_, TransportError>(Message::Text(frame))));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        trace!(target: "codecollab::session", "ignoring non-utf8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(err) => Some(Err(TransportError::from(err))),
            })
        });

        Ok(SocketLink::new(Box::pin(sink), Box::pin(stream)))
    }
}
