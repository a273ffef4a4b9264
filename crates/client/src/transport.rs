//! Message transport: one reliable, ordered, message-framed connection.

use {
    async_trait::async_trait,
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{net::TcpStream, sync::Mutex},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream,
        tungstenite::{
            self, Message as WsMessage,
            client::IntoClientRequest,
            http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
        },
    },
    tracing::{debug, trace},
};

use janus_protocol::SUBPROTOCOL;

use crate::error::{Error, Result};

/// The connection the client multiplexes every request and event over.
///
/// Only the receive loop calls [`Transport::recv`]; sends may come from any
/// number of concurrent requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one text frame.
    async fn send(&self, text: String) -> Result<()>;

    /// Read the next text frame. `None` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<String>>;

    /// Send a low-level keepalive frame.
    async fn ping(&self) -> Result<()>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport speaking the `janus-protocol` subprotocol.
pub struct WebSocketTransport {
    /// Write half; async mutex so concurrent senders queue up.
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    /// Read half; only the receive loop locks it.
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketTransport {
    /// Dial the gateway.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        debug!(url, status = %response.status(), "websocket handshake complete");
        Ok(Self::new(ws))
    }

    pub fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;
        while let Some(frame) = stream.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(text.as_str().to_owned())),
                WsMessage::Binary(data) => {
                    return String::from_utf8(data.to_vec())
                        .map(Some)
                        .map_err(|_| Error::InvalidUtf8);
                },
                WsMessage::Close(frame) => {
                    debug!(?frame, "gateway sent close frame");
                    return Ok(None);
                },
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                    trace!("skipping control frame");
                },
            }
        }
        Ok(None)
    }

    async fn ping(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Ping(Vec::<u8>::new().into())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
