//! The duplex socket seam under [`crate::transport::ChatTransport`].

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::trace;
use url::Url;

use crate::error::ParleyErr;
use crate::error::Result;

/// Close code sent when the client ends the channel on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported for a close frame without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the channel dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// A frame received from the socket, reduced to what the chat stream uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Opens duplex text sockets. The production implementation speaks
/// websocket; tests substitute a scripted in-memory peer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn DuplexSocket>>;
}

#[async_trait]
pub trait DuplexSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next frame from the peer, or `None` once the socket is gone.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn next_frame(&mut self) -> Option<Result<WireFrame>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn DuplexSocket>> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| ParleyErr::Transport(err.to_string()))?;
        trace!("websocket handshake completed: {}", response.status());
        Ok(Box::new(WebSocketSocket { stream }))
    }
}

struct WebSocketSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexSocket for WebSocketSocket {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| ParleyErr::Transport(err.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<WireFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(ParleyErr::Transport(err.to_string()))),
            };
            match message {
                WsMessage::Text(text) => {
                    return Some(Ok(WireFrame::Text(text.as_str().to_owned())));
                }
                WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(WireFrame::Text(text))),
                    Err(_) => trace!("dropping non-UTF-8 binary frame"),
                },
                WsMessage::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    return Some(Ok(WireFrame::Close { code, reason }));
                }
                // Control frames are answered by tungstenite itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_owned().into(),
            }))
            .await
            .map_err(|err| ParleyErr::Transport(err.to_string()))
    }
}
