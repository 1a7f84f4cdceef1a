//! WebSocket transport over `tokio-tungstenite`.

use std::fmt;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportListener};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

/// Plain `ws://` transport.
///
/// `connect` opens the socket and spawns a reader task that forwards
/// frames to the listener until the socket closes or fails.
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Creates a transport for `url`. Nothing is opened until `connect`.
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            sink: Mutex::new(None),
            reader: StdMutex::new(None),
        }
    }

    /// Endpoint this transport connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn replace_reader(&self, handle: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self.reader.lock().unwrap_or_else(PoisonError::into_inner),
            handle,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.replace_reader(None);
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, listener: TransportListener) -> Result<(), ClientError> {
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    ClientError::ConnectFailed(format!(
                        "timed out after {} ms",
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);
        self.replace_reader(Some(tokio::spawn(read_loop(stream, listener))));
        tracing::debug!(url = %self.url, "websocket open");
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), ClientError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ClientError::Transport("socket is not open".to_string()))?;
        sink.send(Message::text(frame))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }

    async fn close(&self) -> Result<(), ClientError> {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        sink.close()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, listener: TransportListener) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => listener.on_message(text.as_str()),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => listener.on_message(text),
                Err(_) => tracing::warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((NO_STATUS, String::new()));
                listener.on_close(code, reason);
                return;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(err) => {
                listener.on_error(err.to_string());
                return;
            }
        }
    }
    listener.on_close(ABNORMAL_CLOSURE, "stream ended without close frame");
}
