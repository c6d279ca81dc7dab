//! WebSocket transport implementation.
//!
//! Client-side persistent socket using tokio-tungstenite: one protocol
//! packet per websocket message, no length prefixes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::traits::{Transport, TransportError, TransportFactory, TransportFrame, TransportKind};
use crate::url::ConnectionUrl;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A websocket client transport bound to one connection URL.
pub struct WebSocketTransport {
    url: String,
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    /// Create an unconnected transport for the given ws/wss URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Other(format!("WebSocket handshake failed: {e}")))?;

        debug!(url = %self.url, status = %response.status(), "WebSocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, frame: TransportFrame) -> Result<(), TransportError> {
        let message = match frame {
            TransportFrame::Text(text) => Message::Text(text),
            TransportFrame::Binary(data) => Message::Binary(data.to_vec()),
        };

        self.stream_mut()?
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<TransportFrame>, TransportError> {
        loop {
            let stream = self.stream_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(TransportFrame::Text(text))),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(TransportFrame::Binary(data.into())))
                }
                Some(Ok(Message::Ping(data))) => {
                    // Websocket-level keepalive, answered below the protocol.
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        warn!("Failed to send websocket pong: {e}");
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received websocket close frame");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) => {
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }
}

/// Default factory: opens websocket transports only.
///
/// Deployments with a polling transport implementation plug in their own
/// [`TransportFactory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

#[async_trait]
impl TransportFactory for WebSocketFactory {
    fn supports(&self, kind: TransportKind) -> bool {
        kind == TransportKind::Websocket
    }

    async fn open(
        &self,
        kind: TransportKind,
        url: &ConnectionUrl,
        sid: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if kind != TransportKind::Websocket {
            return Err(TransportError::Other(format!(
                "transport kind {kind} not supported by this factory"
            )));
        }
        Ok(Box::new(WebSocketTransport::new(url.build(kind, sid))))
    }
}
