//! WebSocket transport for MCP.
//!
//! - Each text frame carries exactly one UTF-8 JSON-RPC envelope
//! - Binary frames are accepted when they hold valid UTF-8
//! - Ping/pong is handled by the WebSocket layer
//! - A close frame or the end of the stream means the connection is gone
//!
//! # Concurrency
//!
//! A connection is split in two. The read half stays with the receive loop.
//! The write half is owned by a dedicated writer task fed through an
//! [`Outbound`] handle, so request senders, handler tasks and the receive
//! loop can all queue frames without contending for the socket.

use std::io;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::mcp::protocol::{
    encode, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Frames that may queue up for one connection before senders wait.
const OUTBOUND_CAPACITY: usize = 64;

/// An open WebSocket connection, before it is split.
pub struct Connection<S> {
    ws: WebSocketStream<S>,
}

impl Connection<MaybeTlsStream<TcpStream>> {
    /// Opens a client connection to `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or the upgrade fails.
    pub async fn connect(url: &str) -> io::Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(io::Error::other)?;
        Ok(Self { ws })
    }
}

impl Connection<TcpStream> {
    /// Completes the server side of the WebSocket upgrade on `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade handshake fails.
    pub async fn accept(stream: TcpStream) -> io::Result<Self> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(io::Error::other)?;
        Ok(Self { ws })
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Splits the connection into a reader and a writer task.
    ///
    /// The writer sends a close frame and stops when `cancel` fires.
    #[must_use]
    pub fn split(self, cancel: CancellationToken) -> (FrameReader<S>, Outbound, JoinHandle<()>) {
        let (sink, stream) = self.ws.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(run_writer(sink, rx, cancel));
        (FrameReader { stream }, Outbound { tx }, writer)
    }
}

/// Read half of a connection.
pub struct FrameReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> FrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the next envelope.
    ///
    /// Returns `None` once the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails.
    pub async fn read_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message.map_err(io::Error::other)? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Peer closed the connection");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

/// Queue of outbound frames for one connection.
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::Sender<String>,
}

impl Outbound {
    /// Writes a request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails or the writer has stopped.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> io::Result<()> {
        self.send(request).await
    }

    /// Writes a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails or the writer has stopped.
    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> io::Result<()> {
        self.send(notification).await
    }

    /// Writes a success response.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails or the writer has stopped.
    pub async fn send_response(&self, response: &JsonRpcResponse) -> io::Result<()> {
        self.send(response).await
    }

    /// Writes an error response.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails or the writer has stopped.
    pub async fn send_error(&self, error: &JsonRpcError) -> io::Result<()> {
        self.send(error).await
    }

    /// Writes a raw, already-serialised envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped.
    pub async fn send_raw(&self, json: String) -> io::Result<()> {
        self.tx
            .send(json)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer stopped"))
    }

    /// A queue with no socket behind it; frames land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { tx }, rx)
    }

    async fn send<T: Serialize>(&self, envelope: &T) -> io::Result<()> {
        let json = encode(envelope).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send_raw(json).await
    }
}

async fn run_writer<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!("Writer cancelled, closing connection");
                break;
            }

            frame = rx.recv() => {
                let Some(json) = frame else {
                    tracing::debug!("Outbound queue closed, closing connection");
                    break;
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::warn!(error = %e, "Write failed, stopping writer");
                    return;
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}
