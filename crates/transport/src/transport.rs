use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ConnectionError;

/// Duplex text-frame transport to the chat endpoint.
///
/// `recv` returning `Ok(None)` means the peer closed the stream; errors are
/// per-message and leave the transport usable (closure is signalled only by
/// the close path).
pub trait Transport: Sized + Send {
    fn connect(
        url: &str,
    ) -> impl std::future::Future<Output = Result<Self, ConnectionError>> + Send;

    fn send(
        &mut self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;

    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<String>, ConnectionError>> + Send;

    fn close(&mut self) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;
}

/// The production transport: a WebSocket via tokio-tungstenite.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WebSocketTransport {
    async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        Ok(Self { stream })
    }

    async fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.stream
            .send(WsMessage::text(text))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, ConnectionError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                // Control and binary frames carry nothing for the chat layer
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ConnectionError::Transport(e.to_string())),
        }
    }
}
