//! Stream transport abstraction and its WebSocket implementation.
//!
//! The connection manager only needs "open a connection, then yield frames
//! until it ends", so that is all [`Transport`] exposes. [`WsTransport`] is
//! the production implementation over `tokio-tungstenite`; tests substitute
//! scripted transports.

use std::future::Future;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

// ---

/// One inbound unit from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Peer initiated a close.
    Close,
    /// Ping/pong and other control traffic with no payload for us.
    Control,
}

pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server refused the upgrade, typically a bad subscription key.
    #[error("HTTP {status}: upgrade rejected")]
    Rejected { status: u16 },

    #[error("subscription key is not a valid header value")]
    InvalidKey,

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Http(resp) => TransportError::Rejected {
                status: resp.status().as_u16(),
            },
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

/// Something that can open a live stream connection.
pub trait Transport: Send + Sync + 'static {
    /// Open `url`, authenticating with `subscription_key`.
    fn connect(
        &self,
        url: &str,
        subscription_key: &str,
    ) -> impl Future<Output = Result<FrameStream, TransportError>> + Send;
}

/// WebSocket transport. The subscription key travels as the
/// `Sec-WebSocket-Protocol` value, which the server echoes on accept.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    async fn connect(
        &self,
        url: &str,
        subscription_key: &str,
    ) -> Result<FrameStream, TransportError> {
        // ---
        let mut request = url.into_client_request()?;
        let protocol =
            HeaderValue::from_str(subscription_key).map_err(|_| TransportError::InvalidKey)?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let (ws_stream, response) = tokio_tungstenite::connect_async(request).await?;
        info!("WebSocket connected to {} (HTTP {})", url, response.status());

        Ok(ws_stream.map(to_frame).boxed())
    }
}

fn to_frame(msg: Result<Message, tungstenite::Error>) -> Result<Frame, TransportError> {
    // ---
    match msg? {
        Message::Text(text) => Ok(Frame::Text(text)),
        Message::Binary(data) => Ok(Frame::Binary(data)),
        Message::Close(reason) => {
            debug!("WebSocket close frame: {:?}", reason);
            Ok(Frame::Close)
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Frame::Control),
    }
}
